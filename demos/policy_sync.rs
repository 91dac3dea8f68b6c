//! Example keeping several policy enforcers in sync.
//!
//! This example shows how to:
//! - Open listening watchers and a publish-only watcher
//! - React to peer updates in the update callback
//! - Squash a burst of updates into one reload
//! - Observe operations through the metrics callback
//!
//! It runs against the in-process broker. Swap `with_dialer(broker)` for a
//! real Redis address to run it across processes.
//!
//! Run with: cargo run --example policy_sync

use policy_watcher::broker::MemoryBroker;
use policy_watcher::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    println!("=== Policy Sync Example ===\n");

    let broker = MemoryBroker::new();

    // Two enforcers, each reloading its policy when a peer changes it
    let reloads = Arc::new(AtomicUsize::new(0));

    let node_a = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_local_id("node-a")
        .with_ignore_self(true)
        .open()
        .await?;

    let reloads_clone = Arc::clone(&reloads);
    node_a.set_update_callback(move |from| {
        let count = reloads_clone.fetch_add(1, Ordering::SeqCst) + 1;
        println!("[node-a] policy changed by {from}, reloading (reload #{count})");
    });

    let node_b = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_local_id("node-b")
        .with_ignore_self(true)
        .with_squash(Duration::from_millis(50), Duration::from_secs(60))
        .with_metrics_callback(|m: &WatcherMetrics| {
            println!("[node-b] {} took {:.3}ms", m.name, m.latency_ms());
        })
        .open()
        .await?;

    node_b.set_update_callback(|from| {
        println!("[node-b] policy changed by {from}, reloading");
    });

    // Give both subscriptions a moment to be established
    tokio::time::sleep(Duration::from_millis(50)).await;

    println!("\nnode-a saves a policy change...");
    node_a.update().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    println!("\nAn admin tool pushes a burst of five changes...");
    let admin = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_local_id("admin")
        .open_publish_only()
        .await?;
    for _ in 0..5 {
        admin.update().await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!(
        "\nnode-a reloaded {} times, node-b squashed the burst into one reload",
        reloads.load(Ordering::SeqCst)
    );

    admin.close().await;
    node_b.close().await;
    node_a.close().await;

    println!("\n=== Example Complete ===");
    Ok(())
}
