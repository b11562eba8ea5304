use std::env;

use thiserror::Error;

use crate::notify::ENS_REGISTRATION_TOPIC;
use crate::retry::RetryPolicy;
use crate::users::repository::RepositoryConfig;

#[derive(Clone, Debug)]
pub struct Config {
    pub service_name: String,
    /// Postgres URL. Without one every store runs in memory.
    pub db_url: Option<String>,
    pub provision_max_attempts: u32,
    pub first_account_bonus_dollars: u32,
    pub ens_registration_topic: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid VAULT_PROVISION_MAX_ATTEMPTS: {0}")]
    InvalidProvisionMaxAttempts(String),
    #[error("invalid VAULT_FIRST_ACCOUNT_BONUS_DOLLARS: {0}")]
    InvalidFirstAccountBonusDollars(String),
    #[error("invalid VAULT_ENS_REGISTRATION_TOPIC: {0}")]
    InvalidEnsRegistrationTopic(String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let service_name =
            env::var("VAULT_SERVICE_NAME").unwrap_or_else(|_| "ethvault-accounts".to_string());
        let db_url = env::var("VAULT_DB_URL")
            .or_else(|_| env::var("DATABASE_URL"))
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let provision_max_attempts = env::var("VAULT_PROVISION_MAX_ATTEMPTS")
            .unwrap_or_else(|_| RetryPolicy::DEFAULT_MAX_ATTEMPTS.to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidProvisionMaxAttempts(error.to_string()))?;
        if provision_max_attempts == 0 {
            return Err(ConfigError::InvalidProvisionMaxAttempts(
                "must be at least 1".to_string(),
            ));
        }
        let first_account_bonus_dollars = env::var("VAULT_FIRST_ACCOUNT_BONUS_DOLLARS")
            .unwrap_or_else(|_| "1".to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidFirstAccountBonusDollars(error.to_string()))?;
        let ens_registration_topic = env::var("VAULT_ENS_REGISTRATION_TOPIC")
            .unwrap_or_else(|_| ENS_REGISTRATION_TOPIC.to_string())
            .trim()
            .to_string();
        if ens_registration_topic.is_empty() {
            return Err(ConfigError::InvalidEnsRegistrationTopic(
                "must not be empty".to_string(),
            ));
        }

        Ok(Self {
            service_name,
            db_url,
            provision_max_attempts,
            first_account_bonus_dollars,
            ens_registration_topic,
        })
    }

    pub fn for_tests() -> Self {
        Self {
            service_name: "ethvault-accounts-test".to_string(),
            db_url: None,
            provision_max_attempts: RetryPolicy::DEFAULT_MAX_ATTEMPTS,
            first_account_bonus_dollars: 1,
            ens_registration_topic: ENS_REGISTRATION_TOPIC.to_string(),
        }
    }

    pub fn repository_config(&self) -> RepositoryConfig {
        RepositoryConfig {
            provision_retry: RetryPolicy::new(self.provision_max_attempts),
            first_account_bonus_dollars: self.first_account_bonus_dollars,
            ens_registration_topic: self.ens_registration_topic.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_config_carries_settings() {
        let mut config = Config::for_tests();
        config.provision_max_attempts = 5;
        config.first_account_bonus_dollars = 3;
        let repository = config.repository_config();
        assert_eq!(repository.provision_retry.max_attempts(), 5);
        assert_eq!(repository.first_account_bonus_dollars, 3);
        assert_eq!(repository.ens_registration_topic, ENS_REGISTRATION_TOPIC);
    }
}
