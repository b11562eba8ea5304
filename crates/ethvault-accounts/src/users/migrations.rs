//! Forward-only schema migrations for stored [`User`] records.
//!
//! `migrationNumber` on a record is a cursor into [`USER_MIGRATIONS`]: it counts
//! the steps already applied. Entries are therefore positional and the list is
//! append-only. Never reorder, remove or edit a step that has shipped.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use crate::users::store::{UserStore, UserStoreError};
use crate::users::types::User;

/// One pure, total transformation of a user record.
#[derive(Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub apply: fn(User) -> User,
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("name", &self.name).finish()
    }
}

pub static USER_MIGRATIONS: &[Migration] = &[
    // Gives records written before migrations existed a cursor.
    Migration {
        name: "identity",
        apply: identity,
    },
    Migration {
        name: "normalize_account_keys",
        apply: normalize_account_keys,
    },
];

pub fn current_migration_number() -> usize {
    USER_MIGRATIONS.len()
}

fn identity(user: User) -> User {
    user
}

/// Lowercase account keys. An entry whose lowercase key is already taken stays
/// under its original key; accounts and their addresses are left as stored.
fn normalize_account_keys(mut user: User) -> User {
    let mut normalized = BTreeMap::new();
    let mut from_mixed_case = Vec::new();
    for (key, account) in std::mem::take(&mut user.accounts) {
        if key.to_ascii_lowercase() == key {
            normalized.insert(key, account);
        } else {
            from_mixed_case.push((key, account));
        }
    }
    for (key, account) in from_mixed_case {
        let lowered = key.to_ascii_lowercase();
        if normalized.contains_key(&lowered) {
            normalized.insert(key, account);
        } else {
            normalized.insert(lowered, account);
        }
    }
    user.accounts = normalized;
    user
}

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("user {user_id} changed while applying migration {index}")]
    VersionMismatch { user_id: String, index: usize },
    #[error("user {0} disappeared during migration")]
    NotFound(String),
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Clone)]
pub struct Migrator {
    store: Arc<dyn UserStore>,
    migrations: &'static [Migration],
}

impl Migrator {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self::with_migrations(store, USER_MIGRATIONS)
    }

    pub fn with_migrations(store: Arc<dyn UserStore>, migrations: &'static [Migration]) -> Self {
        Self { store, migrations }
    }

    pub fn total(&self) -> usize {
        self.migrations.len()
    }

    /// Apply every pending step, persisting after each one against the version
    /// last read. A concurrent writer makes the whole call fail; callers re-read
    /// and try again.
    pub async fn migrate_user(&self, mut user: User) -> Result<User, MigrationError> {
        let starting = user.migration_number;
        for (index, migration) in self.migrations.iter().enumerate().skip(starting) {
            let expected_version = user.version;
            let migrated = (migration.apply)(user);
            let now = Utc::now().timestamp_millis();
            let user_id = migrated.id.clone();

            user = self
                .store
                .compare_and_swap(&user_id, Some(expected_version), &|stored: &mut User| {
                    *stored = migrated.clone();
                    stored.migration_number = index + 1;
                    stored.updated = now;
                    Ok(())
                })
                .await
                .map_err(|error| match error {
                    UserStoreError::VersionMismatch { .. } => MigrationError::VersionMismatch {
                        user_id: user_id.clone(),
                        index,
                    },
                    UserStoreError::NotFound(id) => MigrationError::NotFound(id),
                    other => MigrationError::Store(other.to_string()),
                })?;

            tracing::debug!(
                user_id = %user.id,
                migration = migration.name,
                migration_number = user.migration_number,
                version = user.version,
                "applied user migration"
            );
        }
        Ok(user)
    }
}
