//! Self-observability for the telemetry path.
//!
//! # Metrics
//! - `trace_relay_spans_exported_total` (counter): spans accepted by the span exporter
//! - `trace_relay_spans_dropped_total` (counter): spans lost to a full queue or a closed processor
//! - `trace_relay_export_failures_total` (counter): failed export batches by `signal`
//! - `trace_relay_span_lifecycle_errors_total` (counter): misuse such as ending a span twice
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; a no-op until a recorder is installed
//! - Telemetry failures are never surfaced to the request path, only counted here

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Self-metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_spans_exported(count: usize) {
    metrics::counter!("trace_relay_spans_exported_total").increment(count as u64);
}

pub fn record_spans_dropped(count: usize) {
    metrics::counter!("trace_relay_spans_dropped_total").increment(count as u64);
}

/// `signal` is `"traces"` or `"metrics"`.
pub fn record_export_failure(signal: &'static str) {
    metrics::counter!("trace_relay_export_failures_total", "signal" => signal).increment(1);
}

pub fn record_lifecycle_error() {
    metrics::counter!("trace_relay_span_lifecycle_errors_total").increment(1);
}
