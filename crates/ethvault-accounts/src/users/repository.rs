use std::sync::Arc;

use chrono::Utc;

use crate::notify::{EnsRegistrationRequest, NotificationQueue, QueueError};
use crate::retry::{RetryError, RetryPolicy};
use crate::secrets::{EncryptedSecret, SecretStore, SecretStoreError};
use crate::users::migrations::{MigrationError, Migrator};
use crate::users::store::{UserStore, UserStoreError};
use crate::users::types::{
    Account, AccountView, AccountWithSecret, CreateAccountParams, CreatedAccount,
    UpdateAccountParams, User, derive_address,
};

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("version mismatch: {0}")]
    VersionMismatch(String),
    /// One of several preconditions did not hold. Which one is deliberately not
    /// reported; re-read the record to find out.
    #[error("condition failed")]
    ConditionFailed,
    #[error("repository unavailable after {attempts} attempts")]
    RepositoryUnavailable { attempts: u32 },
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl RepositoryError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::VersionMismatch(_) => "version_mismatch",
            Self::ConditionFailed => "condition_failed",
            Self::RepositoryUnavailable { .. } => "repository_unavailable",
            Self::Upstream(_) => "upstream_failure",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::NotFound(message)
            | Self::AlreadyExists(message)
            | Self::VersionMismatch(message)
            | Self::Upstream(message) => message.clone(),
            Self::ConditionFailed => "the record did not match the expected state".to_string(),
            Self::RepositoryUnavailable { attempts } => {
                format!("user record could not be provisioned after {attempts} attempts")
            }
        }
    }
}

impl From<UserStoreError> for RepositoryError {
    fn from(error: UserStoreError) -> Self {
        match error {
            UserStoreError::NotFound(id) => Self::NotFound(format!("user {id}")),
            UserStoreError::AlreadyExists(id) => Self::AlreadyExists(format!("user {id}")),
            UserStoreError::VersionMismatch { .. } => Self::VersionMismatch(error.to_string()),
            UserStoreError::ConditionFailed(_) => Self::ConditionFailed,
            UserStoreError::Codec(_) | UserStoreError::Db(_) => Self::Upstream(error.to_string()),
        }
    }
}

impl From<MigrationError> for RepositoryError {
    fn from(error: MigrationError) -> Self {
        match error {
            MigrationError::VersionMismatch { .. } => Self::VersionMismatch(error.to_string()),
            MigrationError::NotFound(id) => Self::NotFound(format!("user {id}")),
            MigrationError::Store(message) => Self::Upstream(message),
        }
    }
}

impl From<SecretStoreError> for RepositoryError {
    fn from(error: SecretStoreError) -> Self {
        match error {
            SecretStoreError::NotFound(id) => Self::NotFound(format!("secret for account {id}")),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<QueueError> for RepositoryError {
    fn from(error: QueueError) -> Self {
        Self::Upstream(error.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    pub provision_retry: RetryPolicy,
    pub first_account_bonus_dollars: u32,
    pub ens_registration_topic: String,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            provision_retry: RetryPolicy::default(),
            first_account_bonus_dollars: 1,
            ens_registration_topic: crate::notify::ENS_REGISTRATION_TOPIC.to_string(),
        }
    }
}

/// Account lifecycle over the user aggregate and its separately stored secrets.
///
/// Writes to the user row go through compare-and-swap only. The secret store
/// and the queue are not transactional with it; see the individual operations
/// for the order of side effects.
#[derive(Clone)]
pub struct AccountRepository {
    users: Arc<dyn UserStore>,
    secrets: Arc<dyn SecretStore>,
    queue: Arc<dyn NotificationQueue>,
    migrator: Migrator,
    config: RepositoryConfig,
}

impl AccountRepository {
    pub fn new(
        users: Arc<dyn UserStore>,
        secrets: Arc<dyn SecretStore>,
        queue: Arc<dyn NotificationQueue>,
    ) -> Self {
        Self::new_with_config(users, secrets, queue, RepositoryConfig::default())
    }

    pub fn new_with_config(
        users: Arc<dyn UserStore>,
        secrets: Arc<dyn SecretStore>,
        queue: Arc<dyn NotificationQueue>,
        config: RepositoryConfig,
    ) -> Self {
        let migrator = Migrator::new(users.clone());
        Self {
            users,
            secrets,
            queue,
            migrator,
            config,
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Load the user, creating it on first touch, and bring it up to the
    /// current schema. Losing a creation race is retried within the configured
    /// budget; any other failure is returned as is.
    pub async fn get_or_create_user(&self, user_id: &str) -> Result<User, RepositoryError> {
        let total = self.migrator.total();
        let user = self
            .config
            .provision_retry
            .run(
                |attempt| self.load_or_create(user_id, total, attempt),
                |error| matches!(error, UserStoreError::AlreadyExists(_)),
            )
            .await
            .map_err(|error| match error {
                RetryError::Exhausted { attempts, .. } => {
                    RepositoryError::RepositoryUnavailable { attempts }
                }
                RetryError::Fatal(error) => RepositoryError::from(error),
            })?;

        Ok(self.migrator.migrate_user(user).await?)
    }

    async fn load_or_create(
        &self,
        user_id: &str,
        migration_number: usize,
        attempt: u32,
    ) -> Result<User, UserStoreError> {
        if let Some(existing) = self.users.get_by_id(user_id).await? {
            return Ok(existing);
        }
        let fresh = User::new(user_id, Self::now(), migration_number);
        match self.users.create_if_absent(&fresh).await {
            Ok(()) => {
                tracing::info!(user_id, "provisioned user");
                Ok(fresh)
            }
            Err(error @ UserStoreError::AlreadyExists(_)) => {
                tracing::warn!(user_id, attempt, "lost user creation race");
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    pub async fn get_account(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<Account, RepositoryError> {
        let account_id = account_id.to_lowercase();
        let user = self.get_or_create_user(user_id).await?;
        user.accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("account {account_id}")))
    }

    pub async fn get_account_private_data(
        &self,
        account_id: &str,
    ) -> Result<EncryptedSecret, RepositoryError> {
        Ok(self.secrets.get(&account_id.to_lowercase()).await?)
    }

    pub async fn list_accounts(
        &self,
        user_id: &str,
        include_archived: bool,
    ) -> Result<Vec<AccountView>, RepositoryError> {
        let user = self.get_or_create_user(user_id).await?;
        Ok(user
            .accounts
            .iter()
            .filter(|(_, account)| include_archived || !account.archived)
            .map(|(id, account)| AccountView::from_account(id, account))
            .collect())
    }

    pub async fn get_account_with_private_data(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<AccountWithSecret, RepositoryError> {
        let account_id = account_id.to_lowercase();
        let account = self.get_account(user_id, &account_id).await?;
        let encrypted_json = self.get_account_private_data(&account_id).await?;
        Ok(AccountWithSecret {
            account: AccountView::from_account(&account_id, &account),
            encrypted_json,
        })
    }

    /// Create an account. Side effects, in order: secret write, user row
    /// insert, registration message. None of them is rolled back when a later
    /// one fails. A secret orphaned by a failed insert is never reachable since
    /// account ids are not reused.
    pub async fn create_account(
        &self,
        user_id: &str,
        params: CreateAccountParams,
    ) -> Result<CreatedAccount, RepositoryError> {
        let user = self.get_or_create_user(user_id).await?;
        let is_first_account = user.accounts.is_empty();

        let account_id = uuid::Uuid::new_v4().to_string().to_lowercase();
        let now = Self::now();
        let account = Account {
            name: params.name,
            description: params.description,
            version: 1,
            created: now,
            updated: now,
            archived: false,
            address: derive_address(&params.encrypted_json.address),
            ens_name: params.ens_name,
        };

        self.secrets.put(&account_id, &params.encrypted_json).await?;

        self.users
            .compare_and_swap(user_id, None, &|stored: &mut User| {
                if stored.accounts.contains_key(&account_id) {
                    return Err(UserStoreError::ConditionFailed(
                        "account slot is taken".to_string(),
                    ));
                }
                stored.accounts.insert(account_id.clone(), account.clone());
                stored.updated = now;
                Ok(())
            })
            .await
            .map_err(conditional_write_error)?;

        tracing::info!(user_id, account_id = %account_id, "created account");

        if let Some(ens_name) = account.ens_name.clone() {
            let dollars_to_send = if is_first_account {
                self.config.first_account_bonus_dollars
            } else {
                0
            };
            let message = EnsRegistrationRequest {
                ens_name,
                address: account.address.clone(),
                dollars_to_send,
            }
            .into_message(&self.config.ens_registration_topic)?;
            self.queue.enqueue(message).await.map_err(|error| {
                tracing::error!(
                    user_id,
                    account_id = %account_id,
                    reason = %error,
                    "account committed but ens registration was not enqueued"
                );
                RepositoryError::from(error)
            })?;
        }

        Ok(CreatedAccount {
            account_id,
            account,
        })
    }

    /// Rename or re-describe an active account the caller has seen at
    /// `params.expected_version`. A missing user, missing account, archived
    /// account and stale version all yield [`RepositoryError::ConditionFailed`].
    pub async fn update_account_details(
        &self,
        user_id: &str,
        account_id: &str,
        params: UpdateAccountParams,
    ) -> Result<(), RepositoryError> {
        let account_id = account_id.to_lowercase();
        let now = Self::now();
        self.users
            .compare_and_swap(user_id, None, &|stored: &mut User| {
                let Some(account) = stored.accounts.get_mut(&account_id) else {
                    return Err(UserStoreError::ConditionFailed("account".to_string()));
                };
                if account.archived || account.version != params.expected_version {
                    return Err(UserStoreError::ConditionFailed("account".to_string()));
                }
                account.name = params.name.clone();
                account.description = params.description.clone();
                account.version += 1;
                account.updated = now;
                stored.updated = now;
                Ok(())
            })
            .await
            .map_err(conditional_write_error)?;
        Ok(())
    }

    /// Flip the archived flag without a version check, so the last writer wins.
    /// The secret is then deleted on a best-effort basis; unarchiving does not
    /// bring it back.
    pub async fn set_archived(
        &self,
        user_id: &str,
        account_id: &str,
        archived: bool,
    ) -> Result<(), RepositoryError> {
        let account_id = account_id.to_lowercase();
        let now = Self::now();
        self.users
            .compare_and_swap(user_id, None, &|stored: &mut User| {
                let Some(account) = stored.accounts.get_mut(&account_id) else {
                    return Err(UserStoreError::ConditionFailed("account".to_string()));
                };
                account.archived = archived;
                account.version += 1;
                account.updated = now;
                stored.updated = now;
                Ok(())
            })
            .await
            .map_err(conditional_write_error)?;

        tracing::info!(user_id, account_id = %account_id, archived, "set account archived flag");

        if let Err(error) = self.secrets.delete(&account_id).await {
            tracing::warn!(
                user_id,
                account_id = %account_id,
                reason = %error,
                "failed to delete secret for archived account"
            );
        }
        Ok(())
    }
}

/// Collapse every precondition failure of a conditional user write into one
/// outcome. A vanished user row is one of those preconditions.
fn conditional_write_error(error: UserStoreError) -> RepositoryError {
    match error {
        UserStoreError::NotFound(_) | UserStoreError::ConditionFailed(_) => {
            RepositoryError::ConditionFailed
        }
        other => RepositoryError::from(other),
    }
}
