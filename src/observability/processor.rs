//! Batching span processor.
//!
//! # Data Flow
//! ```text
//! Tracer::end ──try_send──▶ bounded queue ──▶ worker task ──▶ SpanExporter
//!                 │                             │
//!                 └─ full: drop + count         ├─ batch full      → export
//!                                               ├─ scheduled delay → export
//!                                               └─ flush/shutdown  → drain + export
//! ```
//!
//! # Design Decisions
//! - Submission never waits: the request path only pays for a `try_send`
//! - Export runs on the worker task with a deadline; no lock is held across it
//! - A failed batch is logged, counted and dropped

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::schema::BatchSettings;
use crate::observability::export::{ExportError, SpanExporter};
use crate::observability::internal;
use crate::observability::span::SpanData;
use crate::observability::Resource;

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_queue_size: usize,
    pub max_export_batch_size: usize,
    pub scheduled_delay: Duration,
    pub export_timeout: Duration,
}

impl BatchConfig {
    pub fn from_settings(settings: &BatchSettings, export_timeout: Duration) -> Self {
        Self {
            max_queue_size: settings.max_queue_size,
            max_export_batch_size: settings.max_export_batch_size,
            scheduled_delay: Duration::from_millis(settings.scheduled_delay_ms),
            export_timeout,
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 2048,
            max_export_batch_size: 512,
            scheduled_delay: Duration::from_secs(5),
            export_timeout: Duration::from_secs(30),
        }
    }
}

enum Control {
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    dropped: AtomicU64,
    exported: AtomicU64,
    failed_batches: AtomicU64,
}

pub struct BatchSpanProcessor {
    spans: mpsc::Sender<SpanData>,
    control: mpsc::Sender<Control>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BatchSpanProcessor {
    /// Spawn the export worker. Must be called inside a Tokio runtime.
    pub fn new(exporter: Arc<dyn SpanExporter>, resource: Resource, config: BatchConfig) -> Self {
        let (spans_tx, spans_rx) = mpsc::channel(config.max_queue_size.max(1));
        let (control_tx, control_rx) = mpsc::channel(8);
        let counters = Arc::new(Counters::default());

        let worker = Worker {
            exporter,
            resource,
            config,
            counters: counters.clone(),
            batch: Vec::new(),
        };
        let handle = tokio::spawn(worker.run(spans_rx, control_rx));

        Self {
            spans: spans_tx,
            control: control_tx,
            counters,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue an ended span without waiting.
    pub fn on_end(&self, span: SpanData) {
        match self.spans.try_send(span) {
            Ok(()) => {}
            Err(TrySendError::Full(span)) => {
                self.record_drop();
                tracing::debug!(trace_id = %span.context.trace_id, "Span queue full, dropping span");
            }
            Err(TrySendError::Closed(_)) => {
                self.record_drop();
            }
        }
    }

    /// Export everything queued so far and wait for it.
    pub async fn force_flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Flush(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Final flush, then stop the worker. Later spans are dropped.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Control::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        let handle = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    pub fn exported_count(&self) -> u64 {
        self.counters.exported.load(Ordering::Relaxed)
    }

    pub fn failed_batch_count(&self) -> u64 {
        self.counters.failed_batches.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        internal::record_spans_dropped(1);
    }
}

struct Worker {
    exporter: Arc<dyn SpanExporter>,
    resource: Resource,
    config: BatchConfig,
    counters: Arc<Counters>,
    batch: Vec<SpanData>,
}

impl Worker {
    async fn run(mut self, mut spans: mpsc::Receiver<SpanData>, mut control: mpsc::Receiver<Control>) {
        let delay = self.config.scheduled_delay;
        let mut ticker = time::interval_at(time::Instant::now() + delay, delay);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = spans.recv() => match received {
                    Some(span) => {
                        self.batch.push(span);
                        if self.batch.len() >= self.config.max_export_batch_size {
                            self.export().await;
                        }
                    }
                    None => {
                        self.export().await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.export().await;
                }
                command = control.recv() => match command {
                    Some(Control::Flush(ack)) => {
                        self.drain(&mut spans).await;
                        let _ = ack.send(());
                    }
                    Some(Control::Shutdown(ack)) => {
                        spans.close();
                        self.drain(&mut spans).await;
                        if let Err(e) = self.exporter.shutdown().await {
                            tracing::warn!(error = %e, "Span exporter shutdown failed");
                        }
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.drain(&mut spans).await;
                        break;
                    }
                },
            }
        }

        tracing::debug!(
            exported = self.counters.exported.load(Ordering::Relaxed),
            dropped = self.counters.dropped.load(Ordering::Relaxed),
            "Span processor stopped"
        );
    }

    async fn drain(&mut self, spans: &mut mpsc::Receiver<SpanData>) {
        while let Ok(span) = spans.try_recv() {
            self.batch.push(span);
            if self.batch.len() >= self.config.max_export_batch_size {
                self.export().await;
            }
        }
        self.export().await;
    }

    async fn export(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        let size = batch.len();
        let timeout = self.config.export_timeout;

        let result = match time::timeout(timeout, self.exporter.export(&self.resource, batch)).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout(timeout)),
        };

        match result {
            Ok(()) => {
                self.counters.exported.fetch_add(size as u64, Ordering::Relaxed);
                internal::record_spans_exported(size);
            }
            Err(e) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                internal::record_export_failure("traces");
                tracing::warn!(error = %e, spans = size, "Span export failed, dropping batch");
            }
        }
    }
}
