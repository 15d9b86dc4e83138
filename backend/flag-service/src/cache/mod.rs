//! Read-through cache for flag definitions, backed by Redis.
//!
//! Cache availability must never block flag evaluation: every operation here
//! swallows transport errors, logs them and behaves as a cache miss so the
//! caller falls back to the persistent store. Entries expire after a fixed
//! TTL even without explicit invalidation, which bounds staleness if the
//! invalidation broadcast is lost.

use redis::{aio::ConnectionManager, AsyncCommands};
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::FlagWithRules;

/// Flag definition cache manager using Redis
#[derive(Clone)]
pub struct FlagCache {
    redis: ConnectionManager,
    ttl: Duration,
}

impl FlagCache {
    const KEY_PREFIX: &'static str = "flag:v1:";

    pub fn new(redis: ConnectionManager, ttl_secs: u64) -> Self {
        Self {
            redis,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn cache_key(flag_key: &str) -> String {
        format!("{}{}", Self::KEY_PREFIX, flag_key)
    }

    /// Look up a cached definition. Transport or decode failures are
    /// treated as a miss.
    pub async fn get(&self, flag_key: &str) -> Option<FlagWithRules> {
        let key = Self::cache_key(flag_key);
        let mut conn = self.redis.clone();

        match conn.get::<_, Option<String>>(&key).await {
            Ok(Some(data)) => match serde_json::from_str::<FlagWithRules>(&data) {
                Ok(flag) => {
                    debug!("Flag cache HIT for {}", flag_key);
                    Some(flag)
                }
                Err(e) => {
                    // A poisoned entry would otherwise stay until TTL.
                    warn!("Failed to deserialize cached flag {}: {}", flag_key, e);
                    self.invalidate(flag_key).await;
                    None
                }
            },
            Ok(None) => {
                debug!("Flag cache MISS for {}", flag_key);
                None
            }
            Err(e) => {
                warn!("Redis read error for flag cache: {}", e);
                None
            }
        }
    }

    /// Store a definition with the configured TTL. Failures are logged and
    /// ignored; the next read simply misses.
    pub async fn set(&self, flag_key: &str, flag: &FlagWithRules) {
        let key = Self::cache_key(flag_key);

        let data = match serde_json::to_string(flag) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to serialize flag {} for cache: {}", flag_key, e);
                return;
            }
        };

        let mut conn = self.redis.clone();
        if let Err(e) = conn
            .set_ex::<_, _, ()>(&key, data, self.ttl.as_secs())
            .await
        {
            warn!("Failed to write flag cache for {}: {}", flag_key, e);
            return;
        }

        debug!("Flag cache WRITE for {} with TTL {:?}", flag_key, self.ttl);
    }

    /// Evict a single entry. Idempotent: deleting an absent key is a no-op,
    /// so duplicate invalidation messages are harmless.
    pub async fn invalidate(&self, flag_key: &str) {
        let key = Self::cache_key(flag_key);
        let mut conn = self.redis.clone();

        if let Err(e) = conn.del::<_, ()>(&key).await {
            warn!("Failed to invalidate flag cache for {}: {}", flag_key, e);
            return;
        }

        debug!("Flag cache INVALIDATE for {}", flag_key);
    }

    /// Evict every cached flag definition.
    pub async fn invalidate_all(&self) {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", Self::KEY_PREFIX);

        let keys: Vec<String> = {
            let mut iter = match conn.scan_match::<_, String>(&pattern).await {
                Ok(iter) => iter,
                Err(e) => {
                    warn!("Failed to scan flag cache keys: {}", e);
                    return;
                }
            };

            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        if keys.is_empty() {
            return;
        }

        let count = keys.len();
        let mut conn = self.redis.clone();
        if let Err(e) = conn.del::<_, ()>(keys).await {
            warn!("Failed to flush flag cache: {}", e);
            return;
        }

        debug!("Flag cache FLUSH removed {} entries", count);
    }
}
