//! Channel subscription loop and its reconnect supervisor.

use crate::broker::{BrokerEvent, Connection};
use crate::core::connection::ConnectionManager;
use crate::core::options::ReconnectFailureCallback;
use crate::error::Result;
use crate::metrics::{MetricOp, MetricsRecorder};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Subscribe to `channel` and feed payloads into `queue` until the
/// subscription ends.
///
/// Returns `Ok(())` when the broker reports zero remaining subscriptions or the
/// queue's receiver is gone, and the transport error otherwise. The
/// connection is unsubscribed on every exit path; a failing unsubscribe is
/// only recorded in metrics.
pub(crate) async fn run_subscription(
    conn: &dyn Connection,
    channel: &str,
    queue: &mpsc::UnboundedSender<String>,
    metrics: &MetricsRecorder,
) -> Result<()> {
    let started = Instant::now();
    let subscribed = conn.subscribe(channel).await;
    metrics.record_result(MetricOp::Subscribe, started.elapsed(), &subscribed, None);
    subscribed?;

    debug!(channel, "subscribed");

    let outcome = receive_loop(conn, queue, metrics).await;

    let started = Instant::now();
    let unsubscribed = conn.unsubscribe(channel).await;
    metrics.record_result(MetricOp::Unsubscribe, started.elapsed(), &unsubscribed, None);

    outcome
}

async fn receive_loop(
    conn: &dyn Connection,
    queue: &mpsc::UnboundedSender<String>,
    metrics: &MetricsRecorder,
) -> Result<()> {
    loop {
        let started = Instant::now();
        match conn.receive().await? {
            BrokerEvent::Message { payload, .. } => {
                metrics.record(MetricOp::Receive, started.elapsed(), None, Some(payload.len()));
                if queue.send(payload).is_err() {
                    return Ok(());
                }
            }
            BrokerEvent::Subscription { count: 0, .. } => return Ok(()),
            BrokerEvent::Subscription { .. } => {}
        }
    }
}

/// Keeps the subscription alive for as long as the watcher is open.
pub(crate) struct Supervisor {
    pub(crate) connections: Arc<ConnectionManager>,
    pub(crate) metrics: Arc<MetricsRecorder>,
    pub(crate) channel: String,
    pub(crate) interval: Duration,
    pub(crate) on_failure: Option<ReconnectFailureCallback>,
}

impl Supervisor {
    /// Reconnect, subscribe, and wait `interval` after every termination,
    /// until `shutdown` fires.
    pub(crate) async fn run(self, queue: mpsc::UnboundedSender<String>, shutdown: CancellationToken) {
        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                outcome = self.attempt(&queue) => outcome,
            };

            match outcome {
                Ok(()) => debug!(channel = %self.channel, "subscription ended"),
                Err(err) => {
                    warn!(channel = %self.channel, error = %err, "subscription failed");
                    if let Some(on_failure) = &self.on_failure {
                        on_failure(&err);
                    }
                }
            }

            if queue.is_closed() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(channel = %self.channel, "subscription supervisor stopped");
    }

    async fn attempt(&self, queue: &mpsc::UnboundedSender<String>) -> Result<()> {
        let conn = self.connections.subscriber().await?;
        run_subscription(conn.as_ref(), &self.channel, queue, &self.metrics).await
    }
}
