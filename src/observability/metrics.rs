//! Request metric aggregation.
//!
//! # Metrics
//! - `http_requests_total` (counter): requests by `method`, `path`
//! - `http_server_request_duration_seconds` (histogram): handler latency by `method`, `path`
//!
//! # Design Decisions
//! - Per-key state: counters are atomics, each histogram series has its own lock,
//!   and the maps are sharded, so concurrent requests only contend on the same series
//! - Bucket boundaries are fixed per instrument name the first time it is used
//!   or registered; they never change afterwards
//! - Cumulative buckets: a value increments every bucket whose bound is `>=` it,
//!   plus the implicit `+Inf` bucket
//! - Aggregation is cumulative; taking a snapshot never resets state
//! - Paths are raw request paths, so label cardinality is unbounded

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_server_request_duration_seconds";

#[derive(Debug, Error, PartialEq)]
pub enum MetricsError {
    #[error("histogram bucket boundaries must be finite and strictly ascending: {0:?}")]
    InvalidBoundaries(Vec<f64>),

    #[error("histogram {0} already has different bucket boundaries")]
    BoundariesFixed(String),
}

/// Sorted `key=value` pairs identifying one series of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        let mut v: Vec<(String, String)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        Self(v)
    }

    /// The `{method, path}` set used for request metrics.
    pub fn http(method: &str, path: &str) -> Self {
        Self::new(&[("method", method), ("path", path)])
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }

    /// Format labels as `{key="value",key2="value2"}` for Prometheus output.
    pub fn prometheus_str(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect();
        format!("{{{}}}", inner.join(","))
    }
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetricKey {
    name: String,
    labels: LabelSet,
}

#[derive(Debug)]
struct HistogramState {
    /// One cumulative count per explicit boundary.
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

#[derive(Debug)]
struct Histogram {
    boundaries: Arc<[f64]>,
    state: Mutex<HistogramState>,
}

impl Histogram {
    fn new(boundaries: Arc<[f64]>) -> Self {
        let bucket_counts = vec![0; boundaries.len()];
        Self {
            boundaries,
            state: Mutex::new(HistogramState {
                bucket_counts,
                sum: 0.0,
                count: 0,
            }),
        }
    }

    fn observe(&self, value: f64) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        for (i, boundary) in self.boundaries.iter().enumerate() {
            if value <= *boundary {
                state.bucket_counts[i] += 1;
            }
        }
        state.sum += value;
        state.count += 1;
    }

    fn point(&self, key: &MetricKey) -> HistogramPoint {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut bucket_counts = state.bucket_counts.clone();
        bucket_counts.push(state.count);
        HistogramPoint {
            name: key.name.clone(),
            labels: key.labels.clone(),
            boundaries: self.boundaries.to_vec(),
            bucket_counts,
            sum: state.sum,
            count: state.count,
        }
    }
}

/// Validate explicit histogram boundaries.
pub fn validate_boundaries(boundaries: &[f64]) -> Result<(), MetricsError> {
    let finite = boundaries.iter().all(|b| b.is_finite());
    let ascending = boundaries.windows(2).all(|w| w[0] < w[1]);
    if finite && ascending {
        Ok(())
    } else {
        Err(MetricsError::InvalidBoundaries(boundaries.to_vec()))
    }
}

/// Process-wide aggregation state for counters and histograms.
#[derive(Debug)]
pub struct MetricAggregator {
    counters: DashMap<MetricKey, AtomicU64>,
    histograms: DashMap<MetricKey, Histogram>,
    boundaries: DashMap<String, Arc<[f64]>>,
    default_boundaries: Arc<[f64]>,
}

impl MetricAggregator {
    /// `default_boundaries` apply to any histogram not registered explicitly.
    pub fn new(default_boundaries: Vec<f64>) -> Result<Self, MetricsError> {
        validate_boundaries(&default_boundaries)?;
        Ok(Self {
            counters: DashMap::new(),
            histograms: DashMap::new(),
            boundaries: DashMap::new(),
            default_boundaries: default_boundaries.into(),
        })
    }

    /// Fix the boundaries of histogram `name`.
    ///
    /// Re-registering identical boundaries is a no-op; different ones are rejected.
    pub fn register_histogram(&self, name: &str, boundaries: Vec<f64>) -> Result<(), MetricsError> {
        validate_boundaries(&boundaries)?;
        let entry = self
            .boundaries
            .entry(name.to_string())
            .or_insert_with(|| boundaries.clone().into());
        if entry.value().as_ref() == boundaries.as_slice() {
            Ok(())
        } else {
            Err(MetricsError::BoundariesFixed(name.to_string()))
        }
    }

    pub fn boundaries_for(&self, name: &str) -> Arc<[f64]> {
        if let Some(b) = self.boundaries.get(name) {
            return b.value().clone();
        }
        self.boundaries
            .entry(name.to_string())
            .or_insert_with(|| self.default_boundaries.clone())
            .value()
            .clone()
    }

    pub fn increment_counter(&self, name: &str, labels: &LabelSet, delta: u64) {
        let key = MetricKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        // Fast path: existing series under a shard read lock.
        if let Some(c) = self.counters.get(&key) {
            c.fetch_add(delta, Ordering::Relaxed);
            return;
        }
        self.counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// NaN observations are ignored.
    pub fn record_histogram(&self, name: &str, labels: &LabelSet, value: f64) {
        if value.is_nan() {
            tracing::debug!(metric = name, "Ignoring NaN histogram observation");
            return;
        }
        let key = MetricKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        if let Some(h) = self.histograms.get(&key) {
            h.observe(value);
            return;
        }
        let boundaries = self.boundaries_for(name);
        self.histograms
            .entry(key)
            .or_insert_with(|| Histogram::new(boundaries))
            .observe(value);
    }

    pub fn get_counter(&self, name: &str, labels: &LabelSet) -> u64 {
        let key = MetricKey {
            name: name.to_string(),
            labels: labels.clone(),
        };
        self.counters
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Point-in-time copy of every series, sorted by name then labels.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: Vec<CounterPoint> = self
            .counters
            .iter()
            .map(|entry| CounterPoint {
                name: entry.key().name.clone(),
                labels: entry.key().labels.clone(),
                value: entry.value().load(Ordering::Relaxed),
            })
            .collect();
        counters.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));

        let mut histograms: Vec<HistogramPoint> = self
            .histograms
            .iter()
            .map(|entry| entry.value().point(entry.key()))
            .collect();
        histograms.sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));

        MetricsSnapshot {
            timestamp_unix_nano: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64,
            counters,
            histograms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CounterPoint {
    pub name: String,
    pub labels: LabelSet,
    pub value: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramPoint {
    pub name: String,
    pub labels: LabelSet,
    pub boundaries: Vec<f64>,
    /// Cumulative counts, one per boundary followed by the `+Inf` bucket.
    pub bucket_counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl HistogramPoint {
    /// Cumulative count of the bucket with upper bound `le`.
    pub fn bucket(&self, le: f64) -> Option<u64> {
        self.boundaries
            .iter()
            .position(|b| *b == le)
            .map(|i| self.bucket_counts[i])
    }

    pub fn overflow(&self) -> u64 {
        self.bucket_counts.last().copied().unwrap_or(0)
    }
}

/// Immutable view handed to the metric exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp_unix_nano: u64,
    pub counters: Vec<CounterPoint>,
    pub histograms: Vec<HistogramPoint>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str, labels: &LabelSet) -> Option<u64> {
        self.counters
            .iter()
            .find(|c| c.name == name && &c.labels == labels)
            .map(|c| c.value)
    }

    pub fn histogram(&self, name: &str, labels: &LabelSet) -> Option<&HistogramPoint> {
        self.histograms
            .iter()
            .find(|h| h.name == name && &h.labels == labels)
    }

    /// Render in Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let mut last_name: Option<&str> = None;
        for c in &self.counters {
            if last_name != Some(c.name.as_str()) {
                out.push_str(&format!("# TYPE {} counter\n", c.name));
                last_name = Some(&c.name);
            }
            out.push_str(&format!("{}{} {}\n", c.name, c.labels.prometheus_str(), c.value));
        }

        last_name = None;
        for h in &self.histograms {
            if last_name != Some(h.name.as_str()) {
                out.push_str(&format!("# TYPE {} histogram\n", h.name));
                last_name = Some(&h.name);
            }
            for (boundary, count) in h.boundaries.iter().zip(&h.bucket_counts) {
                out.push_str(&format!(
                    "{}_bucket{} {}\n",
                    h.name,
                    with_le(&h.labels, &boundary.to_string()),
                    count
                ));
            }
            out.push_str(&format!("{}_bucket{} {}\n", h.name, with_le(&h.labels, "+Inf"), h.overflow()));
            out.push_str(&format!("{}_sum{} {}\n", h.name, h.labels.prometheus_str(), h.sum));
            out.push_str(&format!("{}_count{} {}\n", h.name, h.labels.prometheus_str(), h.count));
        }

        out
    }
}

fn with_le(labels: &LabelSet, le: &str) -> String {
    let mut pairs: Vec<(&str, &str)> = labels
        .pairs()
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    pairs.push(("le", le));
    LabelSet::new(&pairs).prometheus_str()
}
