use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::time::Instant;

/// Receives one observation per physical cache command attempt and per
/// logical fan-out scan.
pub trait MetricsSink: Send + Sync {
    fn record(&self, start: Instant, operation: &str, success: bool);
}

/// OpenTelemetry query metrics.
///
/// Every observation carries `query` and `success` labels plus the constant
/// `app` and `host` labels of this process.
pub struct QueryMetrics {
    queries_count: Counter<u64>,
    queries_latency: Histogram<f64>,
    constant_labels: Vec<KeyValue>,
}

impl QueryMetrics {
    pub fn new(app: &str, host: &str) -> Self {
        let meter = global::meter("service-skeleton");

        Self {
            queries_count: meter
                .u64_counter("queries_count")
                .with_description("Number of cache queries by operation and outcome")
                .init(),
            queries_latency: meter
                .f64_histogram("queries_latency")
                .with_description("Cache query latency in milliseconds")
                .init(),
            constant_labels: vec![
                KeyValue::new("app", app.to_string()),
                KeyValue::new("host", host.to_string()),
            ],
        }
    }
}

impl MetricsSink for QueryMetrics {
    fn record(&self, start: Instant, operation: &str, success: bool) {
        let mut labels = self.constant_labels.clone();
        labels.push(KeyValue::new("query", operation.to_string()));
        labels.push(KeyValue::new("success", success));

        self.queries_count.add(1, &labels);
        self.queries_latency
            .record(start.elapsed().as_secs_f64() * 1000.0, &labels);
    }
}
