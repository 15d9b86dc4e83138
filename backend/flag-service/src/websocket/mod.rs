//! Real-time push of flag state to subscribed clients.
//!
//! The registry maps flag keys to the set of live connection handles; the
//! invalidation listener re-fetches a flag after each broadcast and pushes
//! the refreshed state to that key's subscribers.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod message_types;
pub mod routes;

/// Unique identifier for a WebSocket subscriber
///
/// Each subscription gets its own id so a closing connection can be removed
/// precisely without disturbing other subscribers of the same flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscriber entry with ID and channel
struct Subscriber {
    id: SubscriberId,
    sender: UnboundedSender<String>,
}

/// Connection registry for WebSocket subscribers, keyed by flag key
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<HashMap<String, Vec<Subscriber>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber to a flag key.
    ///
    /// Returns the subscription id (needed for cleanup) and the channel the
    /// pushed flag state arrives on.
    pub async fn add_subscriber(
        &self,
        flag_key: &str,
    ) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = unbounded_channel();
        let subscriber_id = SubscriberId::new();

        let subscriber = Subscriber {
            id: subscriber_id,
            sender: tx,
        };

        let mut guard = self.inner.write().await;
        guard
            .entry(flag_key.to_string())
            .or_default()
            .push(subscriber);

        tracing::debug!(
            "Added subscriber {:?} to flag {}, total subscribers: {}",
            subscriber_id,
            flag_key,
            guard.get(flag_key).map(|v| v.len()).unwrap_or(0)
        );

        (subscriber_id, rx)
    }

    /// Remove a specific subscriber from a flag key.
    ///
    /// Must be called when a WebSocket connection closes or unsubscribes,
    /// otherwise dead entries accumulate until the next broadcast.
    pub async fn remove_subscriber(&self, flag_key: &str, subscriber_id: SubscriberId) {
        let mut guard = self.inner.write().await;

        if let Some(subscribers) = guard.get_mut(flag_key) {
            subscribers.retain(|s| s.id != subscriber_id);

            if subscribers.is_empty() {
                guard.remove(flag_key);
                tracing::debug!("Removed empty flag entry {} from registry", flag_key);
            }
        }
    }

    /// Broadcast a message to all subscribers of a flag key.
    ///
    /// Dead senders (where send fails) are pruned as a side effect.
    pub async fn broadcast(&self, flag_key: &str, msg: String) {
        let mut guard = self.inner.write().await;
        if let Some(subscribers) = guard.get_mut(flag_key) {
            let before = subscribers.len();

            subscribers.retain(|subscriber| subscriber.sender.send(msg.clone()).is_ok());

            let after = subscribers.len();
            if before != after {
                tracing::debug!(
                    "Broadcast to flag {}: {} dead senders cleaned up, {} active",
                    flag_key,
                    before - after,
                    after
                );
            }
        }
    }

    /// Subscriber count for a flag key (for debugging/metrics)
    pub async fn subscriber_count(&self, flag_key: &str) -> usize {
        let guard = self.inner.read().await;
        guard.get(flag_key).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_broadcast_receive() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.add_subscriber("new-ui").await;

        registry.broadcast("new-ui", "hello".to_string()).await;

        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_broadcast_only_reaches_subscribed_key() {
        let registry = ConnectionRegistry::new();
        let (_id, mut rx) = registry.add_subscriber("new-ui").await;

        registry.broadcast("other-flag", "nope".to_string()).await;
        registry.broadcast("new-ui", "yes".to_string()).await;

        assert_eq!(rx.recv().await.as_deref(), Some("yes"));
    }

    #[tokio::test]
    async fn test_remove_subscriber_cleans_up() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = registry.add_subscriber("new-ui").await;
        assert_eq!(registry.subscriber_count("new-ui").await, 1);

        registry.remove_subscriber("new-ui", id).await;
        assert_eq!(registry.subscriber_count("new-ui").await, 0);
    }

    #[tokio::test]
    async fn test_dead_senders_are_pruned_on_broadcast() {
        let registry = ConnectionRegistry::new();
        let (_id, rx) = registry.add_subscriber("new-ui").await;
        drop(rx);

        registry.broadcast("new-ui", "msg".to_string()).await;
        assert_eq!(registry.subscriber_count("new-ui").await, 0);
    }
}
