use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::VaultDb;
use crate::users::types::User;

#[derive(Debug, thiserror::Error)]
pub enum UserStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("version mismatch for {id}: expected {expected}, found {actual}")]
    VersionMismatch { id: String, expected: u64, actual: u64 },
    #[error("condition failed: {0}")]
    ConditionFailed(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Applied to the stored record while the store holds it exclusively.
///
/// Returning an error (normally [`UserStoreError::ConditionFailed`]) aborts the
/// write and leaves the stored record untouched.
pub type UserMutator<'a> = dyn Fn(&mut User) -> Result<(), UserStoreError> + Send + Sync + 'a;

/// Conditional document store for [`User`] aggregates.
///
/// Every read is strongly consistent. The store bumps `version` by exactly one
/// on each successful [`UserStore::compare_and_swap`], whatever the mutator did
/// to it, and never lets a mutator change the record id.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, UserStoreError>;

    async fn create_if_absent(&self, user: &User) -> Result<(), UserStoreError>;

    /// `expected_version = None` still applies the mutator atomically but skips
    /// the version precondition.
    async fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        mutate: &UserMutator<'_>,
    ) -> Result<User, UserStoreError>;
}

pub fn memory() -> Arc<dyn UserStore> {
    Arc::new(MemoryUserStore::default())
}

pub fn postgres(db: Arc<VaultDb>) -> Arc<dyn UserStore> {
    Arc::new(PostgresUserStore { db })
}

/// Checks the version precondition and runs the mutator on a copy of `current`.
fn apply_mutation(
    current: &User,
    expected_version: Option<u64>,
    mutate: &UserMutator<'_>,
) -> Result<User, UserStoreError> {
    if let Some(expected) = expected_version {
        if expected != current.version {
            return Err(UserStoreError::VersionMismatch {
                id: current.id.clone(),
                expected,
                actual: current.version,
            });
        }
    }
    let mut next = current.clone();
    mutate(&mut next)?;
    next.id = current.id.clone();
    next.version = current.version + 1;
    Ok(next)
}

#[derive(Default)]
pub struct MemoryUserStore {
    inner: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    /// Overwrite a record directly, bypassing every precondition. Used to seed
    /// legacy rows.
    pub async fn seed(&self, user: User) {
        self.inner.lock().await.insert(user.id.clone(), user);
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, UserStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.get(user_id).cloned())
    }

    async fn create_if_absent(&self, user: &User) -> Result<(), UserStoreError> {
        let mut inner = self.inner.lock().await;
        if inner.contains_key(&user.id) {
            return Err(UserStoreError::AlreadyExists(user.id.clone()));
        }
        inner.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        mutate: &UserMutator<'_>,
    ) -> Result<User, UserStoreError> {
        let mut inner = self.inner.lock().await;
        let Some(current) = inner.get(user_id) else {
            return Err(UserStoreError::NotFound(user_id.to_string()));
        };
        let next = apply_mutation(current, expected_version, mutate)?;
        inner.insert(user_id.to_string(), next.clone());
        Ok(next)
    }
}

struct PostgresUserStore {
    db: Arc<VaultDb>,
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn get_by_id(&self, user_id: &str) -> Result<Option<User>, UserStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                r#"
                SELECT id, version, document
                  FROM vault.users
                 WHERE id = $1
                "#,
                &[&user_id],
            )
            .await
            .map_err(|error| UserStoreError::Db(error.to_string()))?;
        row.as_ref().map(map_user_row).transpose()
    }

    async fn create_if_absent(&self, user: &User) -> Result<(), UserStoreError> {
        let document =
            serde_json::to_value(user).map_err(|error| UserStoreError::Codec(error.to_string()))?;
        let version = version_to_db(user.version)?;
        let client = self.db.client();
        let client = client.lock().await;
        let inserted = client
            .execute(
                r#"
                INSERT INTO vault.users (id, version, document)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO NOTHING
                "#,
                &[&user.id, &version, &document],
            )
            .await
            .map_err(|error| UserStoreError::Db(error.to_string()))?;
        if inserted == 0 {
            return Err(UserStoreError::AlreadyExists(user.id.clone()));
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        mutate: &UserMutator<'_>,
    ) -> Result<User, UserStoreError> {
        let client = self.db.client();
        let mut client = client.lock().await;
        let tx = client
            .transaction()
            .await
            .map_err(|error| UserStoreError::Db(error.to_string()))?;

        let row = tx
            .query_opt(
                r#"
                SELECT id, version, document
                  FROM vault.users
                 WHERE id = $1
                   FOR UPDATE
                "#,
                &[&user_id],
            )
            .await
            .map_err(|error| UserStoreError::Db(error.to_string()))?;
        let Some(row) = row else {
            return Err(UserStoreError::NotFound(user_id.to_string()));
        };
        let current = map_user_row(&row)?;
        let next = apply_mutation(&current, expected_version, mutate)?;

        let document =
            serde_json::to_value(&next).map_err(|error| UserStoreError::Codec(error.to_string()))?;
        let version = version_to_db(next.version)?;
        tx.execute(
            r#"
            UPDATE vault.users
               SET version = $2, document = $3
             WHERE id = $1
            "#,
            &[&user_id, &version, &document],
        )
        .await
        .map_err(|error| UserStoreError::Db(error.to_string()))?;

        tx.commit()
            .await
            .map_err(|error| UserStoreError::Db(error.to_string()))?;
        Ok(next)
    }
}

fn version_to_db(version: u64) -> Result<i64, UserStoreError> {
    i64::try_from(version).map_err(|error| UserStoreError::Codec(error.to_string()))
}

fn map_user_row(row: &tokio_postgres::Row) -> Result<User, UserStoreError> {
    let document: serde_json::Value = row
        .try_get("document")
        .map_err(|error| UserStoreError::Db(error.to_string()))?;
    let version: i64 = row
        .try_get("version")
        .map_err(|error| UserStoreError::Db(error.to_string()))?;
    let mut user: User = serde_json::from_value(document)
        .map_err(|error| UserStoreError::Codec(error.to_string()))?;
    // The indexed column is authoritative for the CAS token.
    user.version =
        u64::try_from(version).map_err(|error| UserStoreError::Codec(error.to_string()))?;
    Ok(user)
}
