//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for one service
//! in the chain. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for a relay service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Service identity and endpoint behaviour.
    pub service: ServiceSection,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Span and metric export settings.
    pub telemetry: TelemetryConfig,

    /// Logging and self-metrics settings.
    pub observability: ObservabilityConfig,
}

/// Service identity and endpoint behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Reported as the `service.name` resource attribute.
    pub name: String,

    /// Reported as the `service.version` resource attribute.
    pub version: String,

    /// Path of the single endpoint this service exposes (e.g., "/a").
    pub route: String,

    /// Downstream URL to call for every request. `None` makes this the
    /// terminal service of the chain.
    pub downstream_url: Option<String>,

    /// Body returned by a terminal service. Defaults to "Hello from <name>".
    pub greeting: Option<String>,
}

impl ServiceSection {
    pub fn greeting(&self) -> String {
        self.greeting
            .clone()
            .unwrap_or_else(|| format!("Hello from {}\n", self.name))
    }
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            name: "service-a".to_string(),
            version: "v1.0.0".to_string(),
            route: "/a".to_string(),
            downstream_url: None,
            greeting: None,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8081").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for the inbound request) in seconds.
    pub request_secs: u64,

    /// Timeout for the downstream call in seconds.
    pub downstream_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            downstream_secs: 10,
        }
    }
}

/// Where spans and metric snapshots are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExporterKind {
    /// JSON over HTTP to the collector endpoint.
    Http,
    /// Write batches to the log.
    Log,
    /// Export disabled.
    None,
}

/// Span and metric export settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub exporter: ExporterKind,

    /// Collector address (e.g., "localhost:4318").
    pub endpoint: String,

    /// Metric export period in seconds.
    pub export_period_secs: u64,

    /// Deadline for a single export call in seconds.
    pub export_timeout_secs: u64,

    /// Latency histogram bucket boundaries, in seconds, ascending.
    pub histogram_buckets: Vec<f64>,

    /// Fraction of new root traces to sample (parent decision wins otherwise).
    pub sample_ratio: f64,

    pub batch: BatchSettings,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            exporter: ExporterKind::Http,
            endpoint: "localhost:4318".to_string(),
            export_period_secs: 60,
            export_timeout_secs: 30,
            histogram_buckets: vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
            sample_ratio: 1.0,
            batch: BatchSettings::default(),
        }
    }
}

/// Span batching settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchSettings {
    /// Spans buffered before new ones are dropped.
    pub max_queue_size: usize,

    /// Maximum spans per export call.
    pub max_export_batch_size: usize,

    /// Export interval for partial batches in milliseconds.
    pub scheduled_delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the self-metrics Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Self-metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9464".to_string(),
        }
    }
}
