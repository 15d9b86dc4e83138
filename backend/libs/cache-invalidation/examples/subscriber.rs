//! Example: Subscribing to flag invalidation events
//!
//! Run with: cargo run --example subscriber

use cache_invalidation::{InvalidationAction, InvalidationSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let redis_url = "redis://127.0.0.1:6379";

    println!("Creating subscriber...");
    let subscriber = InvalidationSubscriber::new(redis_url).await?;

    println!("Subscriber created. Listening for invalidation events...\n");

    let handle = subscriber
        .subscribe(|msg| async move {
            println!("\nReceived invalidation from {}:", msg.source_instance);
            println!("   Message ID: {}", msg.message_id);
            println!("   Action: {:?}", msg.action);
            println!("   Timestamp: {}", msg.timestamp);

            match msg.action {
                InvalidationAction::Update => {
                    if let Some(flag_key) = &msg.flag_key {
                        // In a real instance: evict `flag:v1:{key}` and
                        // re-fetch to pre-warm + push to subscribed clients.
                        println!("   -> Evicting and refreshing flag: {}", flag_key);
                    }
                }
                InvalidationAction::Delete => {
                    if let Some(flag_key) = &msg.flag_key {
                        println!("   -> Evicting removed flag: {}", flag_key);
                    }
                }
                InvalidationAction::All => {
                    println!("   -> Flushing every cached flag definition");
                }
            }

            Ok(())
        })
        .await?;

    println!("Subscriber running. Press Ctrl+C to stop.\n");

    tokio::signal::ctrl_c().await?;

    println!("\nShutting down subscriber...");
    handle.abort();

    Ok(())
}
