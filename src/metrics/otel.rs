//! OpenTelemetry metrics sink.

use super::{MetricsSink, WatcherMetrics};
use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Forwards watcher metrics records to OpenTelemetry instruments.
///
/// Every record increments an operation counter and records its latency,
/// tagged with the operation name and channel. Failed operations also
/// increment an error counter, and payload sizes are recorded for publish and
/// receive.
///
/// # Examples
///
/// ```rust,no_run
/// use policy_watcher::metrics::OtelMetricsSink;
/// use opentelemetry::global;
///
/// let meter = global::meter("policy-watcher");
/// let sink = OtelMetricsSink::new(meter);
/// ```
#[derive(Clone)]
pub struct OtelMetricsSink {
    operations: Counter<u64>,
    errors: Counter<u64>,
    latency: Histogram<f64>,
    payload_size: Histogram<u64>,
}

impl OtelMetricsSink {
    /// Create a new sink with instruments registered on `meter`.
    pub fn new(meter: Meter) -> Self {
        let operations = meter
            .u64_counter("policy_watcher.operations")
            .with_description("Total number of broker operations")
            .build();

        let errors = meter
            .u64_counter("policy_watcher.errors")
            .with_description("Number of failed broker operations")
            .build();

        let latency = meter
            .f64_histogram("policy_watcher.latency")
            .with_description("Duration of broker operations in seconds")
            .with_unit("s")
            .build();

        let payload_size = meter
            .u64_histogram("policy_watcher.payload.size")
            .with_description("Size of published and received payloads")
            .with_unit("By")
            .build();

        Self {
            operations,
            errors,
            latency,
            payload_size,
        }
    }
}

impl MetricsSink for OtelMetricsSink {
    fn record(&self, metrics: &WatcherMetrics) {
        let attributes = [
            KeyValue::new("operation", metrics.name.as_str()),
            KeyValue::new("channel", metrics.channel.clone()),
        ];

        self.operations.add(1, &attributes);
        self.latency.record(metrics.latency.as_secs_f64(), &attributes);

        if !metrics.is_success() {
            self.errors.add(1, &attributes);
        }

        if let Some(size) = metrics.size {
            self.payload_size.record(size as u64, &attributes);
        }
    }
}
