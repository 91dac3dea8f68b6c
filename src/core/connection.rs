//! Publish/subscribe connection pair management.

use crate::broker::{Connection, ConnectionRole, DialTarget, Dialer};
use crate::error::{Result, WatcherError};
use crate::metrics::{MetricOp, MetricsRecorder};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

/// Who is responsible for a connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ownership {
    /// Dialed by the watcher; redialed when dead, closed on teardown.
    Owned,
    /// Supplied by the caller; reused as-is and never closed.
    Borrowed,
}

/// One side of the connection pair.
struct ConnectionSlot {
    conn: Option<Arc<dyn Connection>>,
    ownership: Ownership,
}

impl ConnectionSlot {
    fn new(injected: Option<Arc<dyn Connection>>) -> Self {
        match injected {
            Some(conn) => Self {
                conn: Some(conn),
                ownership: Ownership::Borrowed,
            },
            None => Self {
                conn: None,
                ownership: Ownership::Owned,
            },
        }
    }
}

/// Establishes and re-establishes the publish and subscribe connections.
///
/// Dial and authentication failures are returned to the caller; retrying is
/// the subscription supervisor's job. Once closed, the manager hands out no
/// connections and never dials again.
pub(crate) struct ConnectionManager {
    target: DialTarget,
    dialer: Option<Arc<dyn Dialer>>,
    publisher: Mutex<ConnectionSlot>,
    subscriber: Mutex<ConnectionSlot>,
    metrics: Arc<MetricsRecorder>,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub(crate) fn new(
        target: DialTarget,
        dialer: Option<Arc<dyn Dialer>>,
        pub_connection: Option<Arc<dyn Connection>>,
        sub_connection: Option<Arc<dyn Connection>>,
        metrics: Arc<MetricsRecorder>,
    ) -> Self {
        Self {
            target,
            dialer,
            publisher: Mutex::new(ConnectionSlot::new(pub_connection)),
            subscriber: Mutex::new(ConnectionSlot::new(sub_connection)),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// Make sure both connections are live.
    pub(crate) async fn connect(&self) -> Result<()> {
        self.publisher().await?;
        self.subscriber().await?;
        Ok(())
    }

    /// The live publish connection, dialing a fresh one if needed.
    pub(crate) async fn publisher(&self) -> Result<Arc<dyn Connection>> {
        self.ensure(&self.publisher, ConnectionRole::Publish).await
    }

    /// The live subscribe connection, dialing a fresh one if needed.
    pub(crate) async fn subscriber(&self) -> Result<Arc<dyn Connection>> {
        self.ensure(&self.subscriber, ConnectionRole::Subscribe).await
    }

    async fn ensure(
        &self,
        slot: &Mutex<ConnectionSlot>,
        role: ConnectionRole,
    ) -> Result<Arc<dyn Connection>> {
        let mut slot = slot.lock().await;

        // Checked under the slot lock: a dial that wins the race is closed by
        // `close()` once it gets the lock.
        if self.closed.load(Ordering::Acquire) {
            return Err(WatcherError::Closed);
        }

        if let Some(conn) = &slot.conn {
            if slot.ownership == Ownership::Borrowed || conn.is_alive() {
                return Ok(Arc::clone(conn));
            }
        }

        // Owned and dead: release the stale handle before redialing
        if let Some(stale) = slot.conn.take() {
            debug!(role = role.as_str(), "discarding dead connection");
            let _ = stale.close().await;
        }

        let conn = self.dial(role).await?;
        slot.conn = Some(Arc::clone(&conn));
        Ok(conn)
    }

    async fn dial(&self, role: ConnectionRole) -> Result<Arc<dyn Connection>> {
        let dialer = self
            .dialer
            .as_ref()
            .ok_or(WatcherError::NotConnected(role.as_str()))?;

        let started = Instant::now();
        let result = dialer.dial(role, &self.target).await;
        let latency = started.elapsed();

        match &result {
            Err(err @ WatcherError::Auth(_)) => {
                self.metrics.record(MetricOp::Auth, latency, Some(err), None);
            }
            Err(err) => {
                self.metrics.record(MetricOp::Dial, latency, Some(err), None);
            }
            Ok(_) => {
                self.metrics.record(MetricOp::Dial, latency, None, None);
                if self.target.credential.is_some() {
                    self.metrics.record(MetricOp::Auth, latency, None, None);
                }
                debug!(
                    role = role.as_str(),
                    protocol = %self.target.protocol,
                    address = %self.target.address,
                    "connected to broker"
                );
            }
        }

        result
    }

    /// Close the owned connections and release the borrowed ones.
    pub(crate) async fn close(&self) {
        self.closed.store(true, Ordering::Release);

        for (slot, role) in [
            (&self.publisher, ConnectionRole::Publish),
            (&self.subscriber, ConnectionRole::Subscribe),
        ] {
            let mut slot = slot.lock().await;
            let Some(conn) = slot.conn.take() else {
                continue;
            };
            if slot.ownership == Ownership::Borrowed {
                continue;
            }

            let started = Instant::now();
            let result = conn.close().await;
            self.metrics
                .record_result(MetricOp::Close, started.elapsed(), &result, None);
            if let Err(err) = result {
                debug!(role = role.as_str(), error = %err, "error closing connection");
            }
        }
    }
}
