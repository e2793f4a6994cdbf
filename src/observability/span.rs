//! Span lifecycle management.
//!
//! # State Machine
//! ```text
//! Tracer::start ──▶ Started ──Tracer::end──▶ Ended (terminal)
//!                                              │
//!                                              └─▶ SpanData handed to the processor
//! ```
//!
//! # Design Decisions
//! - A second `end` is rejected with [`SpanError::AlreadyEnded`] and counted;
//!   the processor never sees the span twice
//! - [`SpanGuard`] ends its span exactly once, on explicit `end` or on drop,
//!   which covers early returns, panics and cancelled futures
//! - Unsampled spans go through the same lifecycle but are not exported

use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::observability::context::{SpanId, TraceContext, TraceId};
use crate::observability::internal;
use crate::observability::processor::BatchSpanProcessor;
use crate::observability::sampler::Sampler;

/// Scalar attribute value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(tag = "code", content = "message", rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error(String),
}

/// Span lifecycle misuse.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpanError {
    #[error("span {span_id} of trace {trace_id} was already ended")]
    AlreadyEnded { trace_id: TraceId, span_id: SpanId },
}

/// The exportable record of a span.
#[derive(Debug, Clone, Serialize)]
pub struct SpanData {
    pub name: String,
    pub context: TraceContext,
    #[serde(rename = "start_time_unix_nano", serialize_with = "unix_nanos")]
    pub start_time: SystemTime,
    #[serde(rename = "end_time_unix_nano", serialize_with = "unix_nanos_opt")]
    pub end_time: Option<SystemTime>,
    /// Insertion-ordered; setting an existing key replaces it in place.
    pub attributes: Vec<(String, AttributeValue)>,
    pub status: SpanStatus,
}

impl SpanData {
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

fn unix_nanos<S: Serializer>(t: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let nanos = t.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
    serializer.serialize_u64(nanos)
}

fn unix_nanos_opt<S: Serializer>(t: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error> {
    match t {
        Some(t) => unix_nanos(t, serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanState {
    Started,
    Ended,
}

/// A live span, exclusively owned until it is ended.
#[derive(Debug)]
pub struct Span {
    data: SpanData,
    started: Instant,
    state: SpanState,
}

impl Span {
    /// The child context to thread through the rest of the request.
    pub fn context(&self) -> TraceContext {
        self.data.context
    }

    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn state(&self) -> SpanState {
        self.state
    }

    pub fn is_ended(&self) -> bool {
        self.state == SpanState::Ended
    }

    pub fn data(&self) -> &SpanData {
        &self.data
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.data.attributes.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.data.attributes.push((key, value)),
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        self.data.status = status;
    }
}

/// Creates spans and submits ended ones to the batch processor.
#[derive(Clone)]
pub struct Tracer {
    processor: Arc<BatchSpanProcessor>,
    sampler: Sampler,
}

impl Tracer {
    pub fn new(processor: Arc<BatchSpanProcessor>, sampler: Sampler) -> Self {
        Self { processor, sampler }
    }

    /// Start a span as a child of `parent`, or as the root of a new trace when
    /// `parent` is absent or invalid.
    pub fn start(&self, parent: Option<&TraceContext>, name: impl Into<String>) -> Span {
        let parent = parent.filter(|p| p.is_valid());
        let trace_id = parent.map(|p| p.trace_id).unwrap_or_else(TraceId::random);
        let sampled = self.sampler.should_sample(parent, trace_id);

        let context = TraceContext {
            trace_id,
            span_id: SpanId::random(),
            parent_span_id: parent.map(|p| p.span_id),
            sampled,
        };

        Span {
            data: SpanData {
                name: name.into(),
                context,
                start_time: SystemTime::now(),
                end_time: None,
                attributes: Vec::new(),
                status: SpanStatus::Unset,
            },
            started: Instant::now(),
            state: SpanState::Started,
        }
    }

    /// Start a span whose end is guaranteed by scope.
    pub fn start_guarded(&self, parent: Option<&TraceContext>, name: impl Into<String>) -> SpanGuard {
        SpanGuard {
            span: Some(self.start(parent, name)),
            tracer: self.clone(),
        }
    }

    /// Record the end time and hand the span to the processor.
    ///
    /// Never blocks: a full export queue drops the span and counts the loss.
    ///
    /// A second end is rejected with [`SpanError::AlreadyEnded`] in every
    /// build profile. It does not assert; the misuse is logged at error level
    /// and counted in `trace_relay_span_lifecycle_errors_total`, and the span
    /// is not exported again.
    pub fn end(&self, span: &mut Span) -> Result<(), SpanError> {
        if span.is_ended() {
            internal::record_lifecycle_error();
            tracing::error!(
                trace_id = %span.data.context.trace_id,
                span_id = %span.data.context.span_id,
                name = %span.data.name,
                "Span ended more than once"
            );
            return Err(SpanError::AlreadyEnded {
                trace_id: span.data.context.trace_id,
                span_id: span.data.context.span_id,
            });
        }

        // Monotonic elapsed time keeps end >= start even if the wall clock jumps.
        span.data.end_time = Some(span.data.start_time + span.started.elapsed());
        span.state = SpanState::Ended;

        if span.data.context.sampled {
            self.processor.on_end(span.data.clone());
        }
        Ok(())
    }
}

/// Scoped ownership of a live span.
pub struct SpanGuard {
    span: Option<Span>,
    tracer: Tracer,
}

impl SpanGuard {
    pub fn context(&self) -> TraceContext {
        self.span.as_ref().map(Span::context).unwrap_or_default()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        if let Some(span) = self.span.as_mut() {
            span.set_attribute(key, value);
        }
    }

    pub fn set_status(&mut self, status: SpanStatus) {
        if let Some(span) = self.span.as_mut() {
            span.set_status(status);
        }
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        if let Some(mut span) = self.span.take() {
            let _ = self.tracer.end(&mut span);
        }
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.set_attribute("error", true);
            self.set_status(SpanStatus::Error("handler panicked".to_string()));
        }
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::export::InMemorySpanExporter;
    use crate::observability::processor::BatchConfig;
    use crate::observability::Resource;

    fn tracer_with(exporter: &InMemorySpanExporter, sampler: Sampler) -> (Tracer, Arc<BatchSpanProcessor>) {
        let processor = Arc::new(BatchSpanProcessor::new(
            Arc::new(exporter.clone()),
            Resource::new("test", "0"),
            BatchConfig::default(),
        ));
        (Tracer::new(processor.clone(), sampler), processor)
    }

    #[tokio::test]
    async fn test_root_span_mints_trace() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, _) = tracer_with(&exporter, Sampler::always_on());

        let span = tracer.start(None, "GET /a");
        let ctx = span.context();
        assert!(ctx.is_valid());
        assert_eq!(ctx.parent_span_id, None);
        assert!(ctx.sampled);
        assert_eq!(span.state(), SpanState::Started);
    }

    #[tokio::test]
    async fn test_child_inherits_trace_id() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, _) = tracer_with(&exporter, Sampler::always_on());

        let parent = tracer.start(None, "GET /a").context();
        let child = tracer.start(Some(&parent), "GET /b").context();

        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.parent_span_id, Some(parent.span_id));
        assert_ne!(child.span_id, parent.span_id);
    }

    #[tokio::test]
    async fn test_invalid_parent_starts_new_trace() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, _) = tracer_with(&exporter, Sampler::always_on());

        let empty = TraceContext::empty();
        let span = tracer.start(Some(&empty), "GET /a");
        assert!(span.context().trace_id.is_valid());
        assert_eq!(span.context().parent_span_id, None);
    }

    #[tokio::test]
    async fn test_double_end_is_rejected() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, processor) = tracer_with(&exporter, Sampler::always_on());

        let mut span = tracer.start(None, "GET /a");
        assert!(tracer.end(&mut span).is_ok());
        let first_end = span.data().end_time;

        let err = tracer.end(&mut span).unwrap_err();
        assert!(matches!(err, SpanError::AlreadyEnded { .. }));
        assert_eq!(span.data().end_time, first_end);

        processor.force_flush().await;
        assert_eq!(exporter.spans().len(), 1);
    }

    #[tokio::test]
    async fn test_end_sets_end_time_after_start() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, processor) = tracer_with(&exporter, Sampler::always_on());

        let mut span = tracer.start(None, "GET /a");
        tracer.end(&mut span).unwrap();
        processor.force_flush().await;

        let spans = exporter.spans();
        let end = spans[0].end_time.expect("end time");
        assert!(end >= spans[0].start_time);
    }

    #[tokio::test]
    async fn test_attributes_keep_insertion_order() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, _) = tracer_with(&exporter, Sampler::always_on());

        let mut span = tracer.start(None, "GET /a");
        span.set_attribute("http.method", "GET");
        span.set_attribute("http.target", "/a");
        span.set_attribute("http.method", "POST");

        let keys: Vec<&str> = span.data().attributes.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["http.method", "http.target"]);
        assert_eq!(span.data().attribute("http.method"), Some(&AttributeValue::from("POST")));
    }

    #[tokio::test]
    async fn test_guard_ends_on_drop() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, processor) = tracer_with(&exporter, Sampler::always_on());

        {
            let _guard = tracer.start_guarded(None, "GET /a");
        }
        processor.force_flush().await;

        let spans = exporter.spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].end_time.is_some());
    }

    #[tokio::test]
    async fn test_unsampled_span_is_not_exported() {
        let exporter = InMemorySpanExporter::default();
        let (tracer, processor) = tracer_with(&exporter, Sampler::parent_based(0.0));

        let mut span = tracer.start(None, "GET /a");
        assert!(!span.context().sampled);
        tracer.end(&mut span).unwrap();
        processor.force_flush().await;

        assert!(exporter.spans().is_empty());
    }
}
