use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};

const SCHEMA_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS vault;

CREATE TABLE IF NOT EXISTS vault.users (
    id TEXT PRIMARY KEY,
    version BIGINT NOT NULL,
    document JSONB NOT NULL
);

CREATE TABLE IF NOT EXISTS vault.account_secrets (
    account_id TEXT PRIMARY KEY,
    secret JSONB NOT NULL,
    written_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS vault.notification_outbox (
    message_id TEXT PRIMARY KEY,
    topic TEXT NOT NULL,
    body JSONB NOT NULL,
    enqueued_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS notification_outbox_topic_idx
    ON vault.notification_outbox (topic, enqueued_at);
"#;

#[derive(Clone)]
pub struct VaultDb {
    client: Arc<Mutex<Client>>,
    service_name: String,
}

impl VaultDb {
    /// Open the shared client. The connection driver runs on its own task and
    /// reports a dropped connection under `service_name`; every store sharing
    /// this handle fails its next query after that.
    pub async fn connect(database_url: &str, service_name: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .with_context(|| format!("{service_name}: connect to postgres"))?;

        let service = service_name.to_string();
        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(
                    service = %service,
                    reason = %error,
                    "vault postgres connection lost"
                );
            }
        });

        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            service_name: service_name.to_string(),
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn client(&self) -> Arc<Mutex<Client>> {
        self.client.clone()
    }

    /// Create the `vault` schema and its tables. Safe to run repeatedly.
    pub async fn ensure_schema(&self) -> Result<()> {
        let client = self.client.lock().await;
        client
            .batch_execute(SCHEMA_SQL)
            .await
            .with_context(|| format!("{}: apply vault schema", self.service_name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::VaultDb;

    #[tokio::test]
    async fn connect_error_names_the_service() {
        let error = VaultDb::connect("not a connection string", "vault-test")
            .await
            .err()
            .expect("malformed url should not connect");
        assert!(format!("{error:#}").starts_with("vault-test: connect to postgres"));
    }
}
