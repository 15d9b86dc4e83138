//! Invalidation listener
//!
//! Long-lived background task connecting the broadcast channel to this
//! instance's cache and real-time subscribers: every received message evicts
//! the local cache entry, and update messages additionally re-fetch the flag
//! (pre-warming the cache) and push the refreshed state to subscribed
//! WebSocket clients.
//!
//! Eviction and re-fetch are idempotent, so duplicate deliveries converge to
//! the same state as a single delivery.

use tokio::task::JoinHandle;
use tracing::{info, warn};

use cache_invalidation::{InvalidationAction, InvalidationError, InvalidationSubscriber};

use crate::cache::FlagCache;
use crate::error::AppError;
use crate::services::FlagService;
use crate::websocket::message_types::WsOutboundEvent;
use crate::websocket::ConnectionRegistry;

/// Start the per-process invalidation listener.
pub async fn start_invalidation_listener(
    redis_url: &str,
    cache: FlagCache,
    flags: FlagService,
    registry: ConnectionRegistry,
) -> Result<JoinHandle<()>, InvalidationError> {
    let subscriber = InvalidationSubscriber::new(redis_url).await?;

    let handle = subscriber
        .subscribe(move |msg| {
            let cache = cache.clone();
            let flags = flags.clone();
            let registry = registry.clone();

            async move {
                match msg.action {
                    InvalidationAction::All => {
                        cache.invalidate_all().await;
                    }
                    InvalidationAction::Delete => {
                        if let Some(flag_key) = msg.flag_key {
                            cache.invalidate(&flag_key).await;
                            let event = WsOutboundEvent::FlagRemoved {
                                flag_key: flag_key.clone(),
                            };
                            registry
                                .broadcast(&flag_key, serde_json::to_string(&event)?)
                                .await;
                        }
                    }
                    InvalidationAction::Update => {
                        if let Some(flag_key) = msg.flag_key {
                            cache.invalidate(&flag_key).await;

                            // Re-fetch through the coordinator so the fresh
                            // definition lands back in the cache before it is
                            // pushed to subscribers.
                            match flags.find_by_key(&flag_key).await {
                                Ok(flag) => {
                                    let event = WsOutboundEvent::FlagUpdate {
                                        flag_key: flag_key.clone(),
                                        flag,
                                    };
                                    registry
                                        .broadcast(&flag_key, serde_json::to_string(&event)?)
                                        .await;
                                }
                                Err(AppError::NotFound(_)) => {
                                    let event = WsOutboundEvent::FlagRemoved {
                                        flag_key: flag_key.clone(),
                                    };
                                    registry
                                        .broadcast(&flag_key, serde_json::to_string(&event)?)
                                        .await;
                                }
                                Err(e) => {
                                    // The eviction already happened; the next
                                    // read falls back to the store.
                                    warn!(
                                        flag_key = %flag_key,
                                        error = %e,
                                        "Re-fetch after invalidation failed"
                                    );
                                }
                            }
                        }
                    }
                }

                Ok(())
            }
        })
        .await?;

    info!("Invalidation listener started");
    Ok(handle)
}
