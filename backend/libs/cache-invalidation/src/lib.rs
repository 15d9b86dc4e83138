//! Cache Invalidation Library using Redis Pub/Sub
//!
//! Provides cross-instance cache coherence for flag definitions through
//! broadcast invalidation messages.
//!
//! # Architecture
//!
//! ```text
//! Instance A (flag-service):
//!   1. Update flag definition in DB
//!   2. Publish invalidation to Redis:
//!      PUBLISH flags:invalidate {"flag_key": "new-ui", "action": "Update"}
//!      ↓
//! Redis Pub/Sub (broadcast to all subscribers)
//!      ↓
//! Instance B, C, D:
//!   3. Receive invalidation message
//!   4. Delete cached definition: DEL flag:new-ui
//!   5. Optionally re-fetch and push to subscribed real-time clients
//! ```
//!
//! Delivery is at-least-once from the consumer's point of view: the same
//! message may be observed more than once after reconnects, so handlers
//! must treat invalidation as idempotent (deleting an absent key is a no-op).
//!
//! # Example: Publisher
//!
//! ```no_run
//! use cache_invalidation::InvalidationPublisher;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let publisher = InvalidationPublisher::new(
//!         "redis://localhost:6379",
//!         "flag-service-1".to_string()
//!     ).await?;
//!
//!     // Single flag invalidation
//!     publisher.flag_updated("new-ui").await?;
//!
//!     // Full cache flush
//!     publisher.invalidate_all().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Example: Subscriber
//!
//! ```no_run
//! use cache_invalidation::{InvalidationSubscriber, InvalidationMessage};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let subscriber = InvalidationSubscriber::new("redis://localhost:6379").await?;
//!
//!     let handle = subscriber.subscribe(|msg| async move {
//!         println!("Invalidating: {:?}", msg.flag_key);
//!         Ok(())
//!     }).await?;
//!
//!     handle.await?;
//!     Ok(())
//! }
//! ```

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

mod error;

pub use error::InvalidationError;

type Result<T> = std::result::Result<T, InvalidationError>;

/// What the receiving instance should do with its cached entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum InvalidationAction {
    /// Flag definition changed; evict and optionally re-fetch
    Update,
    /// Flag was removed (soft delete); evict, do not re-fetch
    Delete,
    /// Flush every cached flag definition
    All,
}

/// Cache invalidation message broadcast on the shared channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationMessage {
    pub message_id: String,
    /// Flag key the message refers to; `None` for [`InvalidationAction::All`]
    pub flag_key: Option<String>,
    pub action: InvalidationAction,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Identity of the publishing instance, for tracing
    pub source_instance: String,
}

impl InvalidationMessage {
    /// Flag definition changed
    pub fn update(flag_key: impl Into<String>, source_instance: String) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            flag_key: Some(flag_key.into()),
            action: InvalidationAction::Update,
            timestamp: chrono::Utc::now(),
            source_instance,
        }
    }

    /// Flag removed
    pub fn delete(flag_key: impl Into<String>, source_instance: String) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            flag_key: Some(flag_key.into()),
            action: InvalidationAction::Delete,
            timestamp: chrono::Utc::now(),
            source_instance,
        }
    }

    /// Flush all cached definitions
    pub fn all(source_instance: String) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            flag_key: None,
            action: InvalidationAction::All,
            timestamp: chrono::Utc::now(),
            source_instance,
        }
    }
}

/// Publisher for flag invalidation events
#[derive(Clone)]
pub struct InvalidationPublisher {
    conn: ConnectionManager,
    channel: String,
    instance_name: String,
}

impl InvalidationPublisher {
    /// Default Redis channel for flag invalidation
    pub const DEFAULT_CHANNEL: &'static str = "flags:invalidate";

    /// Create new publisher
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `instance_name` - Name of the publishing instance (e.g., "flag-service-1")
    pub async fn new(redis_url: &str, instance_name: String) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            channel: Self::DEFAULT_CHANNEL.to_string(),
            instance_name,
        })
    }

    /// Create publisher with custom channel
    pub async fn with_channel(
        redis_url: &str,
        instance_name: String,
        channel: String,
    ) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;

        Ok(Self {
            conn,
            channel,
            instance_name,
        })
    }

    /// Publish an invalidation message
    ///
    /// Returns the number of subscribers that received the message.
    pub async fn publish(&self, msg: InvalidationMessage) -> Result<usize> {
        let payload = serde_json::to_string(&msg)?;

        debug!(
            message_id = %msg.message_id,
            flag_key = ?msg.flag_key,
            action = ?msg.action,
            channel = %self.channel,
            "Publishing invalidation message"
        );

        let mut conn = self.conn.clone();
        let subscriber_count: usize = conn.publish(&self.channel, payload).await?;

        info!(
            message_id = %msg.message_id,
            subscribers = subscriber_count,
            "Invalidation message published"
        );

        Ok(subscriber_count)
    }

    /// Broadcast that a flag definition changed
    pub async fn flag_updated(&self, flag_key: &str) -> Result<usize> {
        self.publish(InvalidationMessage::update(
            flag_key,
            self.instance_name.clone(),
        ))
        .await
    }

    /// Broadcast that a flag was removed
    pub async fn flag_deleted(&self, flag_key: &str) -> Result<usize> {
        self.publish(InvalidationMessage::delete(
            flag_key,
            self.instance_name.clone(),
        ))
        .await
    }

    /// Broadcast a full cache flush
    pub async fn invalidate_all(&self) -> Result<usize> {
        self.publish(InvalidationMessage::all(self.instance_name.clone()))
            .await
    }
}

/// Subscriber for flag invalidation events
pub struct InvalidationSubscriber {
    client: Client,
    channel: String,
}

impl InvalidationSubscriber {
    /// Create new subscriber
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        Ok(Self {
            client,
            channel: InvalidationPublisher::DEFAULT_CHANNEL.to_string(),
        })
    }

    /// Create subscriber with custom channel
    pub async fn with_channel(redis_url: &str, channel: String) -> Result<Self> {
        let client = Client::open(redis_url)?;

        Ok(Self { client, channel })
    }

    /// Subscribe to invalidation events with a callback
    ///
    /// Returns a JoinHandle for the long-lived listener task. Each message is
    /// handled in its own spawned task so a slow callback (e.g. a pre-warm
    /// re-fetch) never stalls delivery of subsequent invalidation messages.
    pub async fn subscribe<F, Fut>(&self, callback: F) -> Result<JoinHandle<()>>
    where
        F: Fn(InvalidationMessage) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&self.channel).await?;

        info!(channel = %self.channel, "Subscribed to invalidation events");

        let callback = Arc::new(callback);

        let handle = tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            while let Some(msg) = stream.next().await {
                let payload = match msg.get_payload::<String>() {
                    Ok(p) => p,
                    Err(e) => {
                        error!(error = ?e, "Failed to get message payload");
                        continue;
                    }
                };

                let invalidation: InvalidationMessage = match serde_json::from_str(&payload) {
                    Ok(m) => m,
                    Err(e) => {
                        error!(error = ?e, payload = %payload, "Failed to deserialize message");
                        continue;
                    }
                };

                debug!(
                    message_id = %invalidation.message_id,
                    flag_key = ?invalidation.flag_key,
                    action = ?invalidation.action,
                    "Received invalidation message"
                );

                let callback = Arc::clone(&callback);
                tokio::spawn(async move {
                    let message_id = invalidation.message_id.clone();
                    if let Err(e) = callback(invalidation).await {
                        error!(
                            error = ?e,
                            message_id = %message_id,
                            "Invalidation callback failed"
                        );
                    }
                });
            }

            warn!("Invalidation subscription ended");
        });

        Ok(handle)
    }

    /// Stop subscription
    pub async fn unsubscribe(&self, handle: JoinHandle<()>) -> Result<()> {
        handle.abort();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_message() {
        let msg = InvalidationMessage::update("new-ui", "instance-a".to_string());

        assert_eq!(msg.flag_key, Some("new-ui".to_string()));
        assert_eq!(msg.action, InvalidationAction::Update);
        assert_eq!(msg.source_instance, "instance-a");
    }

    #[test]
    fn test_delete_message() {
        let msg = InvalidationMessage::delete("old-banner", "instance-b".to_string());

        assert_eq!(msg.flag_key, Some("old-banner".to_string()));
        assert_eq!(msg.action, InvalidationAction::Delete);
    }

    #[test]
    fn test_all_message_has_no_key() {
        let msg = InvalidationMessage::all("instance-a".to_string());

        assert_eq!(msg.flag_key, None);
        assert_eq!(msg.action, InvalidationAction::All);
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = InvalidationMessage::update("k", "i".to_string());
        let b = InvalidationMessage::update("k", "i".to_string());
        assert_ne!(a.message_id, b.message_id);
    }

    #[test]
    fn test_message_serialization_roundtrip() {
        let msg = InvalidationMessage::update("beta", "instance-a".to_string());

        let json = serde_json::to_string(&msg).unwrap();
        let deserialized: InvalidationMessage = serde_json::from_str(&json).unwrap();

        assert_eq!(msg.message_id, deserialized.message_id);
        assert_eq!(msg.flag_key, deserialized.flag_key);
        assert_eq!(msg.action, deserialized.action);
    }
}
