//! Example: Publishing flag invalidation events
//!
//! Run with: cargo run --example publisher

use cache_invalidation::InvalidationPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let redis_url = "redis://127.0.0.1:6379";
    let instance_name = "flag-service-1".to_string();

    println!("Creating publisher for instance: {}", instance_name);
    let publisher = InvalidationPublisher::new(redis_url, instance_name).await?;

    // Example 1: Flag definition changed
    println!("\n1. Broadcasting flag update...");
    let subscribers = publisher.flag_updated("checkout-redesign").await?;
    println!("   Notified {} subscribers", subscribers);

    // Example 2: Flag removed
    println!("\n2. Broadcasting flag delete...");
    let subscribers = publisher.flag_deleted("old-banner").await?;
    println!("   Notified {} subscribers", subscribers);

    // Example 3: Full cache flush
    println!("\n3. Broadcasting full flush...");
    let subscribers = publisher.invalidate_all().await?;
    println!("   Notified {} subscribers", subscribers);

    // Example 4: Multiple rapid invalidations
    println!("\n4. Rapid invalidations...");
    for i in 0..10 {
        publisher.flag_updated(&format!("rapid-flag-{}", i)).await?;
    }
    println!("   Sent 10 rapid invalidations");

    println!("\nAll examples completed successfully");

    Ok(())
}
