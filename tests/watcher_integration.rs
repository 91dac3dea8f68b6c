//! End-to-end watcher behavior against the in-process broker.

use parking_lot::Mutex;
use policy_watcher::broker::{ConnectionRole, DialTarget, Dialer, MemoryBroker};
use policy_watcher::options;
use policy_watcher::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const WAIT: Duration = Duration::from_secs(2);

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within {WAIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_subscribers(broker: &MemoryBroker, channel: &str, count: usize) {
    wait_until(|| broker.subscriber_count(channel) == count).await;
}

fn listen(watcher: &Watcher) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    watcher.set_update_callback(move |msg| {
        let _ = tx.send(msg.to_string());
    });
    rx
}

async fn next_update(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("no update delivered")
        .expect("callback dropped")
}

fn collect_metrics() -> (Arc<Mutex<Vec<WatcherMetrics>>>, impl Fn(&WatcherMetrics) + Send + Sync + 'static) {
    let records = Arc::new(Mutex::new(Vec::new()));
    let records_clone = Arc::clone(&records);
    (records, move |m: &WatcherMetrics| records_clone.lock().push(m.clone()))
}

fn target() -> DialTarget {
    DialTarget {
        protocol: "tcp".into(),
        address: "memory".into(),
        credential: None,
    }
}

#[tokio::test]
async fn test_update_reaches_peer() {
    let broker = MemoryBroker::new();
    let listener = Watcher::open("memory", [options::with_dialer(broker.clone())])
        .await
        .unwrap();
    let mut rx = listen(&listener);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    let publisher = Watcher::open_publish_only(
        "memory",
        [options::with_dialer(broker.clone()), options::local_id("X")],
    )
    .await
    .unwrap();
    publisher.update().await.unwrap();

    assert_eq!(next_update(&mut rx).await, "X");

    publisher.close().await;
    listener.close().await;
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn test_every_subscriber_on_channel_is_notified() {
    let broker = MemoryBroker::new();
    let first = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_channel("/policies")
        .open()
        .await
        .unwrap();
    let second = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_channel("/policies")
        .open()
        .await
        .unwrap();
    let mut first_rx = listen(&first);
    let mut second_rx = listen(&second);
    wait_for_subscribers(&broker, "/policies", 2).await;

    // A watcher on another channel hears nothing
    let other = Watcher::open("memory", [options::with_dialer(broker.clone())])
        .await
        .unwrap();
    let mut other_rx = listen(&other);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    first.update().await.unwrap();

    assert_eq!(next_update(&mut first_rx).await, first.local_id());
    assert_eq!(next_update(&mut second_rx).await, first.local_id());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(other_rx.try_recv().is_err());

    first.close().await;
    second.close().await;
    other.close().await;
}

#[tokio::test]
async fn test_ignore_self_suppresses_own_updates() {
    let broker = MemoryBroker::new();
    let watcher = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_ignore_self(true)
        .open()
        .await
        .unwrap();
    let mut rx = listen(&watcher);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    watcher.update().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());

    // Peers are still delivered
    let peer = Watcher::open_publish_only(
        "memory",
        [options::with_dialer(broker.clone()), options::local_id("peer")],
    )
    .await
    .unwrap();
    peer.update().await.unwrap();
    assert_eq!(next_update(&mut rx).await, "peer");

    peer.close().await;
    watcher.close().await;
}

#[tokio::test]
async fn test_burst_is_squashed_into_one_delivery() {
    let broker = MemoryBroker::new();
    let listener = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_squash(Duration::from_millis(50), Duration::from_secs(60))
        .open()
        .await
        .unwrap();
    let mut rx = listen(&listener);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    let publisher = Watcher::open_publish_only(
        "memory",
        [options::with_dialer(broker.clone()), options::local_id("burst")],
    )
    .await
    .unwrap();
    for _ in 0..5 {
        publisher.update().await.unwrap();
    }

    assert_eq!(next_update(&mut rx).await, "burst");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());

    publisher.close().await;
    listener.close().await;
}

#[tokio::test]
async fn test_resubscribes_after_disconnect() {
    let broker = MemoryBroker::new();
    let listener = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_reconnect_interval(Duration::from_millis(10))
        .open()
        .await
        .unwrap();
    let mut rx = listen(&listener);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    let publisher = Watcher::open_publish_only(
        "memory",
        [options::with_dialer(broker.clone()), options::local_id("after")],
    )
    .await
    .unwrap();

    assert_eq!(broker.disconnect_all(), 3);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    // The publisher redials its dead connection; the callback survives
    publisher.update().await.unwrap();
    assert_eq!(next_update(&mut rx).await, "after");

    publisher.close().await;
    listener.close().await;
    assert_eq!(broker.connection_count(), 0);
}

#[tokio::test]
async fn test_resubscribes_after_server_side_unsubscribe() {
    let broker = MemoryBroker::new();
    let listener = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_reconnect_interval(Duration::from_millis(10))
        .open()
        .await
        .unwrap();
    let mut rx = listen(&listener);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    assert_eq!(broker.unsubscribe_all("/casbin"), 1);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    listener.update().await.unwrap();
    assert_eq!(next_update(&mut rx).await, listener.local_id());

    listener.close().await;
}

#[tokio::test]
async fn test_reconnect_failures_are_reported() {
    let broker = MemoryBroker::new();
    let failures = Arc::new(Mutex::new(Vec::new()));
    let failures_clone = Arc::clone(&failures);

    let listener = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_reconnect_interval(Duration::from_millis(10))
        .with_reconnect_failure_callback(move |err| failures_clone.lock().push(err.clone()))
        .open()
        .await
        .unwrap();
    wait_for_subscribers(&broker, "/casbin", 1).await;

    broker.set_reachable(false);
    broker.disconnect_all();
    wait_until(|| failures.lock().len() >= 3).await;

    {
        let failures = failures.lock();
        assert!(matches!(failures[0], WatcherError::ConnectionClosed));
        assert!(failures[1..].iter().all(|err| matches!(err, WatcherError::Dial(_))));
    }

    broker.set_reachable(true);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    listener.close().await;
}

#[tokio::test]
async fn test_concurrent_close_tears_down_once() {
    let broker = MemoryBroker::new();
    let (records, sink) = collect_metrics();
    let watcher = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_metrics_callback(sink)
        .open()
        .await
        .unwrap();
    wait_for_subscribers(&broker, "/casbin", 1).await;

    tokio::join!(watcher.close(), watcher.close(), watcher.close());
    watcher.close().await;

    assert!(watcher.is_closed());
    assert_eq!(broker.connection_count(), 0);

    let closes = records
        .lock()
        .iter()
        .filter(|m| m.name == MetricOp::Close)
        .count();
    assert_eq!(closes, 2);
}

#[tokio::test]
async fn test_borrowed_connections_survive_close() {
    let broker = MemoryBroker::new();
    let publish = broker.dial(ConnectionRole::Publish, &target()).await.unwrap();
    let subscribe = broker.dial(ConnectionRole::Subscribe, &target()).await.unwrap();

    let watcher = Watcher::open(
        "memory",
        [options::with_connections(
            Arc::clone(&publish),
            Arc::clone(&subscribe),
        )],
    )
    .await
    .unwrap();
    let mut rx = listen(&watcher);
    wait_for_subscribers(&broker, "/casbin", 1).await;

    watcher.update().await.unwrap();
    assert_eq!(next_update(&mut rx).await, watcher.local_id());

    watcher.close().await;
    assert!(publish.is_alive());
    assert!(subscribe.is_alive());
    assert_eq!(broker.connection_count(), 2);
}

#[tokio::test]
async fn test_password_authentication() {
    let broker = MemoryBroker::new();
    broker.set_password(Some("secret".into()));

    let result = Watcher::open("memory", [options::with_dialer(broker.clone())]).await;
    assert!(matches!(result, Err(WatcherError::Auth(_))));

    let result = Watcher::open(
        "memory",
        [options::with_dialer(broker.clone()), options::password("wrong")],
    )
    .await;
    assert!(matches!(result, Err(WatcherError::Auth(_))));
    assert_eq!(broker.connection_count(), 0);

    let (records, sink) = collect_metrics();
    let watcher = Watcher::builder("memory")
        .with_dialer(broker.clone())
        .with_password("secret")
        .with_metrics_callback(sink)
        .open()
        .await
        .unwrap();

    let auths = records
        .lock()
        .iter()
        .filter(|m| m.name == MetricOp::Auth && m.is_success())
        .count();
    assert_eq!(auths, 2);

    watcher.close().await;
}

#[tokio::test]
async fn test_unreachable_broker_fails_open() {
    let broker = MemoryBroker::new();
    broker.set_reachable(false);

    let result = Watcher::open("memory", [options::with_dialer(broker.clone())]).await;
    assert!(matches!(result, Err(WatcherError::Dial(_))));

    let result = Watcher::open_publish_only("memory", [options::with_dialer(broker.clone())]).await;
    assert!(matches!(result, Err(WatcherError::Dial(_))));
}

#[tokio::test]
async fn test_publish_only_never_subscribes() {
    let broker = MemoryBroker::new();
    let watcher = Watcher::open_publish_only("memory", [options::with_dialer(broker.clone())])
        .await
        .unwrap();
    let mut rx = listen(&watcher);

    watcher.update().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.subscriber_count("/casbin"), 0);
    assert_eq!(broker.connection_count(), 1);
    assert!(rx.try_recv().is_err());

    watcher.close().await;
}

#[tokio::test]
async fn test_publish_metrics() {
    let broker = MemoryBroker::new();
    let watcher = Watcher::open_publish_only(
        "memory",
        [options::with_dialer(broker.clone()), options::channel("/metrics")],
    )
    .await
    .unwrap();

    let (records, sink) = collect_metrics();
    watcher.set_metrics_callback(sink);
    watcher.update().await.unwrap();

    let records = records.lock();
    let publish = records
        .iter()
        .find(|m| m.name == MetricOp::Publish)
        .expect("publish not recorded");
    assert!(publish.is_success());
    assert_eq!(publish.size, Some(watcher.local_id().len()));
    assert_eq!(publish.channel, "/metrics");
    assert_eq!(publish.local_id, watcher.local_id());
    assert_eq!(publish.protocol, "tcp");

    drop(records);
    watcher.close().await;
}

#[tokio::test]
async fn test_failed_publish_is_returned_and_recorded() {
    let broker = MemoryBroker::new();
    let publish = broker.dial(ConnectionRole::Publish, &target()).await.unwrap();

    let (records, sink) = collect_metrics();
    let watcher = Watcher::builder("memory")
        .with_pub_connection(Arc::clone(&publish))
        .with_metrics_callback(sink)
        .open_publish_only()
        .await
        .unwrap();

    // A dead borrowed connection is not redialed
    publish.close().await.unwrap();
    let result = watcher.update().await;
    assert!(matches!(result, Err(WatcherError::ConnectionClosed)));

    let records = records.lock();
    let publishes: Vec<&WatcherMetrics> = records
        .iter()
        .filter(|m| m.name == MetricOp::Publish)
        .collect();
    assert_eq!(publishes.len(), 1);
    assert_eq!(publishes[0].error.as_deref(), Some("Connection closed"));
    assert_eq!(publishes[0].size, Some(watcher.local_id().len()));

    drop(records);
    watcher.close().await;
}

#[tokio::test]
async fn test_update_fails_after_close() {
    let broker = MemoryBroker::new();
    let watcher = Watcher::open("memory", [options::with_dialer(broker.clone())])
        .await
        .unwrap();
    watcher.close().await;

    assert!(matches!(watcher.update().await, Err(WatcherError::Closed)));
}
