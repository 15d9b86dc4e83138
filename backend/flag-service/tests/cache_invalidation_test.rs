//! Multi-instance cache coherence tests.
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test cache_invalidation_test -- --ignored
//!
//! Consistency is eventual by design: an instance may serve a stale
//! definition until the broadcast lands or the TTL expires. What must hold
//! is convergence within one broadcast round trip and idempotency under
//! duplicate delivery.

use std::time::Duration;

use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;

use cache_invalidation::{InvalidationMessage, InvalidationPublisher, InvalidationSubscriber};
use flag_service::cache::FlagCache;
use flag_service::models::{FlagDefinition, FlagType, FlagWithRules};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn redis_manager() -> ConnectionManager {
    let client = redis::Client::open(REDIS_URL).expect("Failed to parse Redis URL");
    ConnectionManager::new(client)
        .await
        .expect("Failed to connect to Redis")
}

fn sample_flag(key: &str, rollout: i32) -> FlagWithRules {
    FlagWithRules {
        flag: FlagDefinition {
            id: Uuid::new_v4(),
            key: key.to_string(),
            name: key.to_string(),
            description: None,
            enabled: true,
            flag_type: FlagType::Boolean.as_str().to_string(),
            rollout_percentage: rollout,
            created_by: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        },
        variants: Vec::new(),
        targets: Vec::new(),
    }
}

fn unique_key(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4().simple())
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn cached_read_roundtrip_and_eviction() {
    let cache = FlagCache::new(redis_manager().await, 60);
    let key = unique_key("roundtrip");
    let flag = sample_flag(&key, 40);

    assert!(cache.get(&key).await.is_none());

    cache.set(&key, &flag).await;
    let cached = cache.get(&key).await.expect("expected cache hit");
    assert_eq!(cached.flag.key, key);
    assert_eq!(cached.flag.rollout_percentage, 40);

    cache.invalidate(&key).await;
    assert!(cache.get(&key).await.is_none());
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn ttl_bounds_staleness_without_broadcast() {
    let cache = FlagCache::new(redis_manager().await, 1);
    let key = unique_key("ttl");
    cache.set(&key, &sample_flag(&key, 40)).await;

    assert!(cache.get(&key).await.is_some());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(
        cache.get(&key).await.is_none(),
        "entry survived past its TTL"
    );
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn update_on_one_instance_converges_on_the_other() {
    // Instance A mutates; instance B holds a cached copy and runs the
    // invalidation listener. After one broadcast round trip B's next read
    // must miss (and therefore hit the store for the new definition).
    let cache_b = FlagCache::new(redis_manager().await, 300);
    let key = unique_key("converge");
    cache_b.set(&key, &sample_flag(&key, 10)).await;

    // Stale reads before the broadcast are explicitly allowed.
    assert_eq!(
        cache_b.get(&key).await.unwrap().flag.rollout_percentage,
        10
    );

    let subscriber = InvalidationSubscriber::new(REDIS_URL)
        .await
        .expect("Failed to create subscriber");
    let cache_for_listener = cache_b.clone();
    let handle = subscriber
        .subscribe(move |msg| {
            let cache = cache_for_listener.clone();
            async move {
                if let Some(flag_key) = msg.flag_key {
                    cache.invalidate(&flag_key).await;
                }
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Instance A: persist (elided), evict own entry, broadcast.
    let publisher = InvalidationPublisher::new(REDIS_URL, "instance-a".to_string())
        .await
        .expect("Failed to create publisher");
    publisher.flag_updated(&key).await.expect("publish failed");

    // Convergence within a broadcast round trip, far under TTL.
    let mut converged = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if cache_b.get(&key).await.is_none() {
            converged = true;
            break;
        }
    }
    assert!(converged, "instance B still serves the stale entry");

    handle.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn duplicate_invalidation_delivery_is_idempotent() {
    let cache = FlagCache::new(redis_manager().await, 300);
    let key = unique_key("idempotent");
    cache.set(&key, &sample_flag(&key, 10)).await;

    let subscriber = InvalidationSubscriber::new(REDIS_URL)
        .await
        .expect("Failed to create subscriber");
    let cache_for_listener = cache.clone();
    let handle = subscriber
        .subscribe(move |msg| {
            let cache = cache_for_listener.clone();
            async move {
                if let Some(flag_key) = msg.flag_key {
                    cache.invalidate(&flag_key).await;
                }
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");

    tokio::time::sleep(Duration::from_millis(100)).await;

    // The same message delivered twice (at-least-once semantics).
    let publisher = InvalidationPublisher::new(REDIS_URL, "instance-a".to_string())
        .await
        .expect("Failed to create publisher");
    let msg = InvalidationMessage::update(key.clone(), "instance-a".to_string());
    publisher.publish(msg.clone()).await.expect("first publish");
    publisher.publish(msg).await.expect("second publish");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(cache.get(&key).await.is_none());

    // Re-populating afterwards works normally.
    cache.set(&key, &sample_flag(&key, 99)).await;
    assert_eq!(
        cache.get(&key).await.unwrap().flag.rollout_percentage,
        99
    );

    handle.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn invalidate_all_flushes_every_flag_entry() {
    let cache = FlagCache::new(redis_manager().await, 300);
    let keys: Vec<String> = (0..5).map(|i| unique_key(&format!("flush-{}", i))).collect();

    for key in &keys {
        cache.set(key, &sample_flag(key, 50)).await;
    }
    for key in &keys {
        assert!(cache.get(key).await.is_some());
    }

    cache.invalidate_all().await;

    for key in &keys {
        assert!(cache.get(key).await.is_none());
    }
}
