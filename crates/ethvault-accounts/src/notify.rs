use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::VaultDb;

pub const ENS_REGISTRATION_TOPIC: &str = "ens.registration";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message_id: String,
    pub topic: String,
    pub body: Value,
    pub enqueued_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(topic: &str, body: Value) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            body,
            enqueued_at: Utc::now(),
        }
    }
}

/// Asks the registrar to point `ens_name` at `address` and fund it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnsRegistrationRequest {
    pub ens_name: String,
    pub address: String,
    pub dollars_to_send: u32,
}

impl EnsRegistrationRequest {
    pub fn into_message(self, topic: &str) -> Result<OutboundMessage, QueueError> {
        let body = serde_json::to_value(&self)
            .map_err(|error| QueueError::InvalidMessage(error.to_string()))?;
        Ok(OutboundMessage::new(topic, body))
    }

    /// Decode a queued message on the consumer side.
    pub fn from_message(message: &OutboundMessage) -> Result<Self, QueueError> {
        let request: Self = serde_json::from_value(message.body.clone())
            .map_err(|error| QueueError::InvalidMessage(error.to_string()))?;
        if request.ens_name.trim().is_empty() {
            return Err(QueueError::InvalidMessage("ensName is empty".to_string()));
        }
        if request.address.trim().is_empty() {
            return Err(QueueError::InvalidMessage("address is empty".to_string()));
        }
        Ok(request)
    }
}

/// At-least-once delivery of side-effect messages.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    async fn enqueue(&self, message: OutboundMessage) -> Result<(), QueueError>;
}

pub fn memory() -> Arc<dyn NotificationQueue> {
    Arc::new(MemoryNotificationQueue::default())
}

pub fn postgres(db: Arc<VaultDb>) -> Arc<dyn NotificationQueue> {
    Arc::new(PostgresNotificationQueue { db })
}

#[derive(Default)]
pub struct MemoryNotificationQueue {
    messages: Mutex<Vec<OutboundMessage>>,
}

impl MemoryNotificationQueue {
    pub async fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().await.clone()
    }

    pub async fn drain(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.messages.lock().await)
    }
}

#[async_trait]
impl NotificationQueue for MemoryNotificationQueue {
    async fn enqueue(&self, message: OutboundMessage) -> Result<(), QueueError> {
        self.messages.lock().await.push(message);
        Ok(())
    }
}

/// Transactional outbox; a relay process forwards rows to the real queue.
struct PostgresNotificationQueue {
    db: Arc<VaultDb>,
}

#[async_trait]
impl NotificationQueue for PostgresNotificationQueue {
    async fn enqueue(&self, message: OutboundMessage) -> Result<(), QueueError> {
        let client = self.db.client();
        let client = client.lock().await;
        client
            .execute(
                r#"
                INSERT INTO vault.notification_outbox (message_id, topic, body, enqueued_at)
                VALUES ($1, $2, $3, now())
                ON CONFLICT (message_id) DO NOTHING
                "#,
                &[&message.message_id, &message.topic, &message.body],
            )
            .await
            .map_err(|error| QueueError::Unavailable(error.to_string()))?;
        Ok(())
    }
}
