#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::{config::Config, db::VaultDb, users::AccountRepository};

pub mod cache;
pub mod config;
pub mod db;
pub mod notify;
pub mod retry;
pub mod secrets;
pub mod users;

/// Wire the repository to Postgres when a database URL is configured, and to
/// in-memory stores otherwise.
pub async fn build_repository(config: &Config) -> Result<AccountRepository> {
    let repository_config = config.repository_config();
    let repository = match config.db_url.as_deref() {
        Some(url) => {
            let db = Arc::new(VaultDb::connect(url, &config.service_name).await?);
            db.ensure_schema().await.context("prepare vault schema")?;
            AccountRepository::new_with_config(
                users::store::postgres(db.clone()),
                secrets::store::postgres(db.clone()),
                notify::postgres(db),
                repository_config,
            )
        }
        None => AccountRepository::new_with_config(
            users::store::memory(),
            secrets::store::memory(),
            notify::memory(),
            repository_config,
        ),
    };
    info!(
        service = %config.service_name,
        backend = if config.db_url.is_some() { "postgres" } else { "memory" },
        "account repository ready"
    );
    Ok(repository)
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::build_repository;
    use crate::config::Config;

    #[tokio::test]
    async fn memory_repository_provisions_users_without_a_database() -> Result<()> {
        let repository = build_repository(&Config::for_tests()).await?;
        let user = repository.get_or_create_user("u1").await?;
        assert_eq!(user.version, 1);
        assert!(user.accounts.is_empty());
        Ok(())
    }
}
