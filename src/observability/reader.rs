//! Periodic metric reader.
//!
//! Snapshots the aggregator on a fixed interval, independent of request volume,
//! and hands the snapshot to the metric exporter. A failed export drops that
//! snapshot only; the aggregator keeps accumulating.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::observability::export::{ExportError, MetricExporter};
use crate::observability::internal;
use crate::observability::metrics::MetricAggregator;
use crate::observability::Resource;

enum Control {
    Flush(oneshot::Sender<Result<(), ExportError>>),
    Shutdown(oneshot::Sender<()>),
}

pub struct PeriodicReader {
    control: mpsc::Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicReader {
    /// Spawn the reader task. Must be called inside a Tokio runtime.
    pub fn spawn(
        aggregator: Arc<MetricAggregator>,
        exporter: Arc<dyn MetricExporter>,
        resource: Resource,
        period: Duration,
        export_timeout: Duration,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::channel(8);
        let task = ReaderTask {
            aggregator,
            exporter,
            resource,
            export_timeout,
        };
        let handle = tokio::spawn(task.run(period, control_rx));
        Self {
            control: control_tx,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Export a snapshot now and report the outcome.
    pub async fn force_flush(&self) -> Result<(), ExportError> {
        let (tx, rx) = oneshot::channel();
        self.control
            .send(Control::Flush(tx))
            .await
            .map_err(|_| ExportError::Shutdown)?;
        rx.await.map_err(|_| ExportError::Shutdown)?
    }

    /// Best-effort final export, then stop.
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
}

struct ReaderTask {
    aggregator: Arc<MetricAggregator>,
    exporter: Arc<dyn MetricExporter>,
    resource: Resource,
    export_timeout: Duration,
}

impl ReaderTask {
    async fn run(self, period: Duration, mut control: mpsc::Receiver<Control>) {
        tracing::info!(period_secs = period.as_secs_f64(), "Metric reader starting");

        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.collect_and_export().await;
                }
                command = control.recv() => match command {
                    Some(Control::Flush(ack)) => {
                        let _ = ack.send(self.collect_and_export().await);
                    }
                    Some(Control::Shutdown(ack)) => {
                        let _ = self.collect_and_export().await;
                        if let Err(e) = self.exporter.shutdown().await {
                            tracing::warn!(error = %e, "Metric exporter shutdown failed");
                        }
                        let _ = ack.send(());
                        break;
                    }
                    None => break,
                },
            }
        }

        tracing::debug!("Metric reader stopped");
    }

    async fn collect_and_export(&self) -> Result<(), ExportError> {
        let snapshot = self.aggregator.snapshot();
        let result = match time::timeout(
            self.export_timeout,
            self.exporter.export(&self.resource, snapshot),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout(self.export_timeout)),
        };

        if let Err(e) = &result {
            internal::record_export_failure("metrics");
            tracing::warn!(error = %e, "Metric export failed, dropping snapshot");
        }
        result
    }
}
