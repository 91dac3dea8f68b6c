//! Metrics records and the recorder that emits them.

use crate::error::WatcherError;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// The operation a metrics record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricOp {
    /// A connection was dialed.
    Dial,
    /// A freshly dialed connection was authenticated.
    Auth,
    /// An owned connection was closed.
    Close,
    /// A change notification was published.
    Publish,
    /// The subscribe connection subscribed to the channel.
    Subscribe,
    /// A payload was received on the channel.
    Receive,
    /// The subscribe connection unsubscribed from the channel.
    Unsubscribe,
}

impl MetricOp {
    /// Lowercase name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dial => "dial",
            Self::Auth => "auth",
            Self::Close => "close",
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Receive => "receive",
            Self::Unsubscribe => "unsubscribe",
        }
    }
}

impl fmt::Display for MetricOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherMetrics {
    /// Which operation was observed.
    pub name: MetricOp,
    /// How long the operation took.
    pub latency: Duration,
    /// Channel the watcher is bound to.
    pub channel: String,
    /// The watcher's instance identifier.
    pub local_id: String,
    /// Transport protocol.
    pub protocol: String,
    /// Error message, if the operation failed.
    pub error: Option<String>,
    /// Payload size in bytes, for publish and receive.
    pub size: Option<usize>,
}

impl WatcherMetrics {
    /// Latency in fractional milliseconds.
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }

    /// Whether the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives metrics records.
///
/// Sinks run inline on the task that performed the operation and must not
/// block. Any `Fn(&WatcherMetrics) + Send + Sync` closure is a sink.
pub trait MetricsSink: Send + Sync {
    /// Record one operation.
    fn record(&self, metrics: &WatcherMetrics);
}

impl<F> MetricsSink for F
where
    F: Fn(&WatcherMetrics) + Send + Sync,
{
    fn record(&self, metrics: &WatcherMetrics) {
        self(metrics)
    }
}

/// Builds records for one watcher and hands them to the current sink.
pub(crate) struct MetricsRecorder {
    sink: RwLock<Option<Arc<dyn MetricsSink>>>,
    channel: String,
    local_id: String,
    protocol: String,
}

impl MetricsRecorder {
    pub(crate) fn new(
        sink: Option<Arc<dyn MetricsSink>>,
        channel: impl Into<String>,
        local_id: impl Into<String>,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            sink: RwLock::new(sink),
            channel: channel.into(),
            local_id: local_id.into(),
            protocol: protocol.into(),
        }
    }

    /// Replace the sink. `None` stops recording.
    pub(crate) fn set_sink(&self, sink: Option<Arc<dyn MetricsSink>>) {
        *self.sink.write() = sink;
    }

    pub(crate) fn record(
        &self,
        name: MetricOp,
        latency: Duration,
        error: Option<&WatcherError>,
        size: Option<usize>,
    ) {
        // Clone out so the sink never runs under the lock
        let Some(sink) = self.sink.read().clone() else {
            return;
        };

        sink.record(&WatcherMetrics {
            name,
            latency,
            channel: self.channel.clone(),
            local_id: self.local_id.clone(),
            protocol: self.protocol.clone(),
            error: error.map(ToString::to_string),
            size,
        });
    }

    /// Record the outcome of an operation that returned a `Result`.
    pub(crate) fn record_result<T>(
        &self,
        name: MetricOp,
        latency: Duration,
        result: &Result<T, WatcherError>,
        size: Option<usize>,
    ) {
        self.record(name, latency, result.as_ref().err(), size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn collecting() -> (Arc<Mutex<Vec<WatcherMetrics>>>, Arc<dyn MetricsSink>) {
        let records = Arc::new(Mutex::new(Vec::new()));
        let records_clone = Arc::clone(&records);
        let sink: Arc<dyn MetricsSink> =
            Arc::new(move |m: &WatcherMetrics| records_clone.lock().push(m.clone()));
        (records, sink)
    }

    #[test]
    fn test_record_fills_identity_fields() {
        let (records, sink) = collecting();
        let recorder = MetricsRecorder::new(Some(sink), "/casbin", "id1", "tcp");

        recorder.record(MetricOp::Publish, Duration::from_millis(3), None, Some(3));

        let records = records.lock();
        assert_eq!(records.len(), 1);
        let m = &records[0];
        assert_eq!(m.name, MetricOp::Publish);
        assert_eq!(m.channel, "/casbin");
        assert_eq!(m.local_id, "id1");
        assert_eq!(m.protocol, "tcp");
        assert_eq!(m.size, Some(3));
        assert!(m.is_success());
        assert!((m.latency_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_is_recorded() {
        let (records, sink) = collecting();
        let recorder = MetricsRecorder::new(Some(sink), "/casbin", "id1", "tcp");

        let result: Result<(), WatcherError> = Err(WatcherError::ConnectionClosed);
        recorder.record_result(MetricOp::Unsubscribe, Duration::ZERO, &result, None);

        let records = records.lock();
        assert_eq!(records[0].error.as_deref(), Some("Connection closed"));
        assert!(!records[0].is_success());
    }

    #[test]
    fn test_no_sink_is_silent() {
        let recorder = MetricsRecorder::new(None, "/casbin", "id1", "tcp");
        recorder.record(MetricOp::Dial, Duration::ZERO, None, None);

        let (records, sink) = collecting();
        recorder.set_sink(Some(sink));
        recorder.record(MetricOp::Dial, Duration::ZERO, None, None);
        recorder.set_sink(None);
        recorder.record(MetricOp::Dial, Duration::ZERO, None, None);

        assert_eq!(records.lock().len(), 1);
    }

    #[test]
    fn test_serialize() {
        let m = WatcherMetrics {
            name: MetricOp::Receive,
            latency: Duration::from_millis(1),
            channel: "/casbin".into(),
            local_id: "id1".into(),
            protocol: "tcp".into(),
            error: None,
            size: Some(36),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["name"], "receive");
        assert_eq!(json["size"], 36);
    }
}
