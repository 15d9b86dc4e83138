//! Integration tests for the cache invalidation library
//!
//! These tests require a running Redis instance.
//! Run with: cargo test --test integration_test -- --ignored

use cache_invalidation::{
    InvalidationAction, InvalidationMessage, InvalidationPublisher, InvalidationSubscriber,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn collecting_subscriber() -> (
    Arc<Mutex<Vec<InvalidationMessage>>>,
    tokio::task::JoinHandle<()>,
) {
    let subscriber = InvalidationSubscriber::new(REDIS_URL)
        .await
        .expect("Failed to create subscriber");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    let handle = subscriber
        .subscribe(move |msg| {
            let received = Arc::clone(&received_clone);
            async move {
                received.lock().await.push(msg);
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");

    // Give subscriber time to connect
    tokio::time::sleep(Duration::from_millis(100)).await;

    (received, handle)
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_publish_and_receive_update_message() {
    let publisher = InvalidationPublisher::new(REDIS_URL, "test-instance".to_string())
        .await
        .expect("Failed to create publisher");

    let (received, handle) = collecting_subscriber().await;

    let subscriber_count = publisher
        .flag_updated("checkout-redesign")
        .await
        .expect("Failed to publish");
    assert!(subscriber_count > 0, "No subscribers received the message");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = received.lock().await;
    assert_eq!(messages.len(), 1);

    let msg = &messages[0];
    assert_eq!(msg.flag_key, Some("checkout-redesign".to_string()));
    assert_eq!(msg.action, InvalidationAction::Update);
    assert_eq!(msg.source_instance, "test-instance");

    handle.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_delete_and_all_actions() {
    let publisher = InvalidationPublisher::new(REDIS_URL, "test-instance".to_string())
        .await
        .expect("Failed to create publisher");

    let (received, handle) = collecting_subscriber().await;

    publisher.flag_deleted("old-banner").await.unwrap();
    publisher.invalidate_all().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let messages = received.lock().await;
    assert_eq!(messages.len(), 2);

    let actions: Vec<_> = messages.iter().map(|m| m.action.clone()).collect();
    assert!(actions.contains(&InvalidationAction::Delete));
    assert!(actions.contains(&InvalidationAction::All));

    let all_msg = messages
        .iter()
        .find(|m| m.action == InvalidationAction::All)
        .unwrap();
    assert_eq!(all_msg.flag_key, None);

    handle.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_all_instances_receive_broadcast() {
    let publisher = InvalidationPublisher::new(REDIS_URL, "instance-a".to_string())
        .await
        .expect("Failed to create publisher");

    let (received_b, handle_b) = collecting_subscriber().await;
    let (received_c, handle_c) = collecting_subscriber().await;

    publisher.flag_updated("new-ui").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(received_b.lock().await.len(), 1);
    assert_eq!(received_c.lock().await.len(), 1);

    handle_b.abort();
    handle_c.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_slow_callback_does_not_stall_delivery() {
    let publisher = InvalidationPublisher::new(REDIS_URL, "test-instance".to_string())
        .await
        .expect("Failed to create publisher");

    let subscriber = InvalidationSubscriber::new(REDIS_URL)
        .await
        .expect("Failed to create subscriber");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = Arc::clone(&received);

    // Callback sleeps for a second; messages are dispatched in their own
    // tasks so all of them must arrive well before the first sleep ends.
    let handle = subscriber
        .subscribe(move |msg| {
            let received = Arc::clone(&received_clone);
            async move {
                received.lock().await.push(msg);
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok(())
            }
        })
        .await
        .expect("Failed to subscribe");

    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..5 {
        publisher
            .flag_updated(&format!("flag-{}", i))
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(500)).await;

    let messages = received.lock().await;
    assert_eq!(messages.len(), 5, "delivery stalled behind a slow callback");

    handle.abort();
}

#[tokio::test]
#[ignore] // Requires Redis server
async fn test_callback_error_does_not_end_subscription() {
    let publisher = InvalidationPublisher::new(REDIS_URL, "test-instance".to_string())
        .await
        .expect("Failed to create publisher");

    let subscriber = InvalidationSubscriber::new(REDIS_URL)
        .await
        .expect("Failed to create subscriber");

    let calls = Arc::new(Mutex::new(0u32));
    let calls_clone = Arc::clone(&calls);

    let handle = subscriber
        .subscribe(move |_msg| {
            let calls = Arc::clone(&calls_clone);
            async move {
                *calls.lock().await += 1;
                Err(cache_invalidation::InvalidationError::CallbackFailed(
                    "simulated failure".to_string(),
                ))
            }
        })
        .await
        .expect("Failed to subscribe");

    tokio::time::sleep(Duration::from_millis(100)).await;

    publisher.flag_updated("a").await.unwrap();
    publisher.flag_updated("b").await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(*calls.lock().await, 2);

    handle.abort();
}
