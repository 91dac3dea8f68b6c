//! Operational metrics for watcher operations.
//!
//! Every observed broker operation (dial, auth, close, publish, subscribe,
//! receive, unsubscribe) produces one [`WatcherMetrics`] record, handed
//! synchronously to the configured [`MetricsSink`]. Without a sink nothing is
//! recorded.
//!
//! With the `metrics` feature, [`OtelMetricsSink`] forwards records to
//! OpenTelemetry:
//!
//! ```rust,ignore
//! use policy_watcher::metrics::OtelMetricsSink;
//! use policy_watcher::options;
//! use opentelemetry::global;
//!
//! let sink = OtelMetricsSink::new(global::meter("policy-watcher"));
//! let opt = options::metrics_sink(sink);
//! ```

mod record;

#[cfg(feature = "metrics")]
mod otel;

pub use record::{MetricOp, MetricsSink, WatcherMetrics};
pub(crate) use record::MetricsRecorder;

#[cfg(feature = "metrics")]
pub use otel::OtelMetricsSink;
