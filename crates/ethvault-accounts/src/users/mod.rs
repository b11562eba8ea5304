pub mod migrations;
pub mod repository;
pub mod store;
pub mod types;

pub use migrations::{Migration, MigrationError, Migrator, USER_MIGRATIONS};
pub use repository::{AccountRepository, RepositoryConfig, RepositoryError};
pub use store::{UserStore, UserStoreError};
