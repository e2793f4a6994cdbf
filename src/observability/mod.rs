//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! inbound headers ──propagation::extract──▶ TraceContext
//!                                              │
//!                         Tracer::start ◀──────┘
//!                              │
//!       request handling (context passed explicitly)
//!                              │
//!          Tracer::end ──▶ BatchSpanProcessor ──▶ SpanExporter
//!
//! MetricAggregator ◀── increment_counter / record_histogram (every request)
//!        │
//!        └── snapshot ◀── PeriodicReader (fixed period) ──▶ MetricExporter
//! ```
//!
//! # Design Decisions
//! - One `Telemetry` value per process, built at startup and passed to the
//!   middleware and the downstream client; no global providers
//! - Telemetry failures are absorbed here and never reach the request path
//! - Shutdown performs a final best-effort flush of spans and metrics

pub mod context;
pub mod export;
pub mod internal;
pub mod logging;
pub mod metrics;
pub mod processor;
pub mod propagation;
pub mod reader;
pub mod sampler;
pub mod span;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::{ExporterKind, ServiceConfig, TelemetryConfig};
use self::export::{ExportError, HttpExporter, LogExporter, MetricExporter, NoopExporter, SpanExporter};
use self::metrics::{MetricAggregator, MetricsError, HTTP_REQUEST_DURATION_SECONDS};
use self::processor::{BatchConfig, BatchSpanProcessor};
use self::reader::PeriodicReader;
use self::sampler::Sampler;
use self::span::Tracer;

pub use self::context::{SpanId, TraceContext, TraceId};

/// Attributes identifying the emitting service, attached to every export batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resource {
    #[serde(rename = "service.name")]
    pub service_name: String,
    #[serde(rename = "service.version")]
    pub service_version: String,
}

impl Resource {
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("metrics setup failed: {0}")]
    Metrics(#[from] MetricsError),

    #[error("exporter setup failed: {0}")]
    Export(#[from] ExportError),
}

/// The process-wide telemetry context.
pub struct Telemetry {
    resource: Resource,
    tracer: Tracer,
    meter: Arc<MetricAggregator>,
    processor: Arc<BatchSpanProcessor>,
    reader: PeriodicReader,
}

impl Telemetry {
    /// Build telemetry with the exporters named in the config.
    ///
    /// Spawns the span processor and metric reader, so it must run inside a
    /// Tokio runtime.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, TelemetryError> {
        let resource = Resource::new(&config.service.name, &config.service.version);
        let settings = &config.telemetry;

        let (spans, metrics): (Arc<dyn SpanExporter>, Arc<dyn MetricExporter>) = match settings.exporter {
            ExporterKind::Http => {
                let exporter = Arc::new(HttpExporter::new(
                    &settings.endpoint,
                    Duration::from_secs(settings.export_timeout_secs),
                )?);
                (exporter.clone() as Arc<dyn SpanExporter>, exporter as Arc<dyn MetricExporter>)
            }
            ExporterKind::Log => (Arc::new(LogExporter) as _, Arc::new(LogExporter) as _),
            ExporterKind::None => (Arc::new(NoopExporter) as _, Arc::new(NoopExporter) as _),
        };

        tracing::info!(
            exporter = ?settings.exporter,
            endpoint = %settings.endpoint,
            export_period_secs = settings.export_period_secs,
            sample_ratio = settings.sample_ratio,
            "Telemetry configured"
        );

        Self::with_exporters(resource, settings, spans, metrics)
    }

    pub fn with_exporters(
        resource: Resource,
        settings: &TelemetryConfig,
        spans: Arc<dyn SpanExporter>,
        metrics: Arc<dyn MetricExporter>,
    ) -> Result<Self, TelemetryError> {
        let meter = Arc::new(MetricAggregator::new(settings.histogram_buckets.clone())?);
        meter.register_histogram(HTTP_REQUEST_DURATION_SECONDS, settings.histogram_buckets.clone())?;

        let export_timeout = Duration::from_secs(settings.export_timeout_secs);
        let processor = Arc::new(BatchSpanProcessor::new(
            spans,
            resource.clone(),
            BatchConfig::from_settings(&settings.batch, export_timeout),
        ));
        let tracer = Tracer::new(processor.clone(), Sampler::parent_based(settings.sample_ratio));
        let reader = PeriodicReader::spawn(
            meter.clone(),
            metrics,
            resource.clone(),
            Duration::from_secs(settings.export_period_secs),
            export_timeout,
        );

        Ok(Self {
            resource,
            tracer,
            meter,
            processor,
            reader,
        })
    }

    pub fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    pub fn meter(&self) -> &MetricAggregator {
        &self.meter
    }

    pub fn span_processor(&self) -> &BatchSpanProcessor {
        &self.processor
    }

    /// Export queued spans and a metrics snapshot now.
    pub async fn force_flush(&self) {
        self.processor.force_flush().await;
        let _ = self.reader.force_flush().await;
    }

    /// Final flush of both pipelines, then stop their tasks.
    pub async fn shutdown(&self) {
        self.processor.shutdown().await;
        self.reader.shutdown().await;
        tracing::info!(
            service = %self.resource.service_name,
            spans_exported = self.processor.exported_count(),
            spans_dropped = self.processor.dropped_count(),
            "Telemetry shut down"
        );
    }
}
