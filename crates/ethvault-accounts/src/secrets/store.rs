use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::VaultDb;
use crate::secrets::types::EncryptedSecret;

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Object-store style access to encrypted wallet secrets, keyed by account id.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Unconditional overwrite.
    async fn put(&self, account_id: &str, secret: &EncryptedSecret) -> Result<(), SecretStoreError>;

    async fn get(&self, account_id: &str) -> Result<EncryptedSecret, SecretStoreError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, account_id: &str) -> Result<(), SecretStoreError>;
}

pub fn memory() -> Arc<dyn SecretStore> {
    Arc::new(MemorySecretStore::default())
}

pub fn postgres(db: Arc<VaultDb>) -> Arc<dyn SecretStore> {
    Arc::new(PostgresSecretStore { db })
}

#[derive(Default)]
pub struct MemorySecretStore {
    inner: Mutex<HashMap<String, EncryptedSecret>>,
}

impl MemorySecretStore {
    pub async fn contains(&self, account_id: &str) -> bool {
        self.inner.lock().await.contains_key(account_id)
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn put(&self, account_id: &str, secret: &EncryptedSecret) -> Result<(), SecretStoreError> {
        let mut inner = self.inner.lock().await;
        inner.insert(account_id.to_string(), secret.clone());
        Ok(())
    }

    async fn get(&self, account_id: &str) -> Result<EncryptedSecret, SecretStoreError> {
        let inner = self.inner.lock().await;
        inner
            .get(account_id)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(account_id.to_string()))
    }

    async fn delete(&self, account_id: &str) -> Result<(), SecretStoreError> {
        let mut inner = self.inner.lock().await;
        inner.remove(account_id);
        Ok(())
    }
}

struct PostgresSecretStore {
    db: Arc<VaultDb>,
}

#[async_trait]
impl SecretStore for PostgresSecretStore {
    async fn put(&self, account_id: &str, secret: &EncryptedSecret) -> Result<(), SecretStoreError> {
        let body = serde_json::to_value(secret)
            .map_err(|error| SecretStoreError::Codec(error.to_string()))?;
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                r#"
                INSERT INTO vault.account_secrets (account_id, secret, written_at)
                VALUES ($1, $2, now())
                ON CONFLICT (account_id)
                DO UPDATE SET secret = EXCLUDED.secret, written_at = EXCLUDED.written_at
                "#,
                &[&account_id, &body],
            )
            .await
            .map_err(|error| SecretStoreError::Db(error.to_string()))?;
        Ok(())
    }

    async fn get(&self, account_id: &str) -> Result<EncryptedSecret, SecretStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        let row = client
            .query_opt(
                r#"
                SELECT secret
                  FROM vault.account_secrets
                 WHERE account_id = $1
                "#,
                &[&account_id],
            )
            .await
            .map_err(|error| SecretStoreError::Db(error.to_string()))?;
        let Some(row) = row else {
            return Err(SecretStoreError::NotFound(account_id.to_string()));
        };
        let body: serde_json::Value = row
            .try_get("secret")
            .map_err(|error| SecretStoreError::Db(error.to_string()))?;
        serde_json::from_value(body).map_err(|error| SecretStoreError::Codec(error.to_string()))
    }

    async fn delete(&self, account_id: &str) -> Result<(), SecretStoreError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                "DELETE FROM vault.account_secrets WHERE account_id = $1",
                &[&account_id],
            )
            .await
            .map_err(|error| SecretStoreError::Db(error.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::test_support::sample_secret;

    #[tokio::test]
    async fn memory_put_overwrites_and_delete_is_idempotent() {
        let store = MemorySecretStore::default();
        let first = sample_secret("aa");
        let second = sample_secret("bb");

        store.put("acct", &first).await.expect("first put");
        store.put("acct", &second).await.expect("overwrite put");
        assert_eq!(store.get("acct").await.expect("get"), second);

        store.delete("acct").await.expect("delete");
        store.delete("acct").await.expect("second delete");
        assert!(matches!(
            store.get("acct").await,
            Err(SecretStoreError::NotFound(_))
        ));
    }

    #[test]
    fn secret_round_trips_unknown_fields() {
        let raw = serde_json::json!({
            "address": "a".repeat(40),
            "id": "3198bc9c-6672-5ab3-d995-4942343ae5b6",
            "version": 3,
            "Crypto": {
                "cipher": "aes-128-ctr",
                "cipherparams": { "iv": "0".repeat(32) },
                "ciphertext": "1".repeat(64),
                "kdf": "scrypt",
                "kdfparams": { "salt": "2".repeat(64), "n": 262144, "dklen": 32, "p": 1, "r": 8 },
                "mac": "3".repeat(64),
                "vendor": "kept"
            },
            "x-ethers": {
                "client": "ethers.js",
                "gethFilename": "UTC--2019",
                "mnemonicCounter": "4".repeat(32),
                "mnemonicCiphertext": "5".repeat(32),
                "version": "0.1"
            },
            "note": "kept too"
        });
        let secret: EncryptedSecret =
            serde_json::from_value(raw.clone()).expect("secret should decode");
        assert_eq!(secret.crypto.kdfparams.n, 262_144);
        assert_eq!(
            secret.x_ethers.as_ref().map(|x| x.client.as_str()),
            Some("ethers.js")
        );
        let encoded = serde_json::to_value(&secret).expect("secret should encode");
        assert_eq!(encoded, raw);
    }
}
