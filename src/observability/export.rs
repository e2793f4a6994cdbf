//! Exporter seams and the sinks shipped with the service.
//!
//! # Responsibilities
//! - `SpanExporter` / `MetricExporter`: opaque best-effort sinks
//! - `HttpExporter`: JSON batches POSTed to the collector
//! - `LogExporter`: batches written to the log
//! - `NoopExporter`: export disabled
//! - `InMemory*`: capture batches for tests and local inspection
//!
//! # Design Decisions
//! - No retry contract: a failed batch is reported once and dropped by the caller
//! - Every batch carries the service `Resource`

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics::MetricsSnapshot;
use crate::observability::span::SpanData;
use crate::observability::Resource;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("collector responded with status {0}")]
    Status(u16),

    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("exporter is shut down")]
    Shutdown,
}

#[async_trait]
pub trait SpanExporter: Send + Sync {
    async fn export(&self, resource: &Resource, batch: Vec<SpanData>) -> Result<(), ExportError>;

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[async_trait]
pub trait MetricExporter: Send + Sync {
    async fn export(&self, resource: &Resource, snapshot: MetricsSnapshot) -> Result<(), ExportError>;

    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct TracePayload<'a> {
    resource: &'a Resource,
    spans: &'a [SpanData],
}

#[derive(Serialize)]
struct MetricPayload<'a> {
    resource: &'a Resource,
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
}

/// POSTs JSON batches to `<endpoint>/v1/traces` and `<endpoint>/v1/metrics`.
#[derive(Debug, Clone)]
pub struct HttpExporter {
    client: reqwest::Client,
    traces_url: String,
    metrics_url: String,
}

impl HttpExporter {
    /// `endpoint` is `host:port` or a full base URL.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, ExportError> {
        let base = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", endpoint.trim_end_matches('/'))
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            traces_url: format!("{}/v1/traces", base),
            metrics_url: format!("{}/v1/metrics", base),
        })
    }

    pub fn traces_url(&self) -> &str {
        &self.traces_url
    }

    pub fn metrics_url(&self) -> &str {
        &self.metrics_url
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<(), ExportError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ExportError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Status(status.as_u16()))
        }
    }
}

#[async_trait]
impl SpanExporter for HttpExporter {
    async fn export(&self, resource: &Resource, batch: Vec<SpanData>) -> Result<(), ExportError> {
        let payload = TracePayload { resource, spans: &batch };
        self.post(&self.traces_url, &payload).await
    }
}

#[async_trait]
impl MetricExporter for HttpExporter {
    async fn export(&self, resource: &Resource, snapshot: MetricsSnapshot) -> Result<(), ExportError> {
        let payload = MetricPayload { resource, snapshot: &snapshot };
        self.post(&self.metrics_url, &payload).await
    }
}

/// Writes each batch to the log at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExporter;

#[async_trait]
impl SpanExporter for LogExporter {
    async fn export(&self, resource: &Resource, batch: Vec<SpanData>) -> Result<(), ExportError> {
        for span in &batch {
            let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();
            tracing::info!(
                service = %resource.service_name,
                trace_id = %span.context.trace_id,
                span_id = %span.context.span_id,
                parent_span_id = ?span.context.parent_span_id.map(|id| id.to_string()),
                name = %span.name,
                status = ?span.status,
                attributes = %attributes,
                "span"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl MetricExporter for LogExporter {
    async fn export(&self, resource: &Resource, snapshot: MetricsSnapshot) -> Result<(), ExportError> {
        tracing::info!(
            service = %resource.service_name,
            counters = snapshot.counters.len(),
            histograms = snapshot.histograms.len(),
            "metrics\n{}",
            snapshot.to_prometheus()
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExporter;

#[async_trait]
impl SpanExporter for NoopExporter {
    async fn export(&self, _resource: &Resource, _batch: Vec<SpanData>) -> Result<(), ExportError> {
        Ok(())
    }
}

#[async_trait]
impl MetricExporter for NoopExporter {
    async fn export(&self, _resource: &Resource, _snapshot: MetricsSnapshot) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Collects exported spans in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemorySpanExporter {
    spans: Arc<Mutex<Vec<SpanData>>>,
    batches: Arc<Mutex<usize>>,
}

impl InMemorySpanExporter {
    pub fn spans(&self) -> Vec<SpanData> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn batch_count(&self) -> usize {
        *self.batches.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl SpanExporter for InMemorySpanExporter {
    async fn export(&self, _resource: &Resource, batch: Vec<SpanData>) -> Result<(), ExportError> {
        self.spans.lock().unwrap_or_else(|e| e.into_inner()).extend(batch);
        *self.batches.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        Ok(())
    }
}

/// Collects exported metric snapshots in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMetricExporter {
    snapshots: Arc<Mutex<Vec<MetricsSnapshot>>>,
}

impl InMemoryMetricExporter {
    pub fn snapshots(&self) -> Vec<MetricsSnapshot> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last(&self) -> Option<MetricsSnapshot> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }
}

#[async_trait]
impl MetricExporter for InMemoryMetricExporter {
    async fn export(&self, _resource: &Resource, snapshot: MetricsSnapshot) -> Result<(), ExportError> {
        self.snapshots.lock().unwrap_or_else(|e| e.into_inner()).push(snapshot);
        Ok(())
    }
}
