//! Request instrumentation.
//!
//! # Responsibilities
//! - Extract the inbound trace context and start the server span
//! - Count requests and record latency per (method, path)
//! - End the span exactly once, however the handler exits
//!
//! # Stage Order
//! ```text
//! enter:  extract + span start → counter increment
//!         handler (downstream calls included)
//! exit:   latency histogram → span end
//! ```
//!
//! # Design Decisions
//! - Exit stages live in [`RequestScope`]'s teardown, which runs from `finish`
//!   or from `Drop` when the request future is cancelled or unwinds
//! - The handler receives the context through request extensions, not an ambient lookup

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::observability::metrics::{LabelSet, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::observability::propagation::{self, Carrier, TRACEPARENT};
use crate::observability::span::{SpanGuard, SpanStatus};
use crate::observability::{Telemetry, TraceContext};

/// Instrumentation state for one in-flight request.
pub struct RequestScope {
    telemetry: Arc<Telemetry>,
    labels: LabelSet,
    span: Option<SpanGuard>,
    started: Instant,
}

impl RequestScope {
    /// Run the entry stages: context extraction, span start, request count.
    pub fn enter<C: Carrier + ?Sized>(
        telemetry: Arc<Telemetry>,
        method: &str,
        path: &str,
        carrier: &C,
    ) -> Self {
        let started = Instant::now();

        tracing::debug!(
            method = %method,
            path = %path,
            traceparent = carrier.get(TRACEPARENT).unwrap_or(""),
            "Extracting trace context"
        );
        let remote = propagation::extract(carrier);
        tracing::debug!(
            remote_trace_id = %remote.trace_id,
            remote_span_id = %remote.span_id,
            remote_valid = remote.is_valid(),
            "Extracted trace context"
        );

        let mut span = telemetry
            .tracer()
            .start_guarded(Some(&remote), format!("{} {}", method, path));
        span.set_attribute("http.method", method);
        span.set_attribute("http.target", path);

        let ctx = span.context();
        tracing::debug!(
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            sampled = ctx.sampled,
            "Span started"
        );

        let labels = LabelSet::http(method, path);
        telemetry.meter().increment_counter(HTTP_REQUESTS_TOTAL, &labels, 1);

        Self {
            telemetry,
            labels,
            span: Some(span),
            started,
        }
    }

    /// Context of the server span, to be passed to downstream calls.
    pub fn context(&self) -> TraceContext {
        self.span.as_ref().map(SpanGuard::context).unwrap_or_default()
    }

    /// Run the exit stages for a request that produced a response.
    pub fn finish(mut self, status: StatusCode) {
        self.teardown(Some(status));
    }

    fn teardown(&mut self, status: Option<StatusCode>) {
        let Some(mut span) = self.span.take() else {
            return;
        };

        let latency = self.started.elapsed().as_secs_f64();
        self.telemetry
            .meter()
            .record_histogram(HTTP_REQUEST_DURATION_SECONDS, &self.labels, latency);

        match status {
            Some(status) => {
                span.set_attribute("http.status_code", i64::from(status.as_u16()));
                if status.is_server_error() {
                    span.set_attribute("error", true);
                    span.set_status(SpanStatus::Error(format!("HTTP {}", status.as_u16())));
                } else {
                    span.set_status(SpanStatus::Ok);
                }
            }
            None => {
                let reason = if std::thread::panicking() {
                    "handler panicked"
                } else {
                    "request did not complete"
                };
                tracing::warn!(
                    trace_id = %span.context().trace_id,
                    reason,
                    "Request ended without a response"
                );
                span.set_attribute("error", true);
                span.set_status(SpanStatus::Error(reason.to_string()));
            }
        }

        span.end();
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.teardown(None);
    }
}

/// Axum middleware wrapping the handler in a [`RequestScope`].
///
/// Inserts the server span's [`TraceContext`] into the request extensions.
pub async fn instrument(
    State(telemetry): State<Arc<Telemetry>>,
    mut request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let scope = RequestScope::enter(telemetry, &method, &path, request.headers());
    request.extensions_mut().insert(scope.context());

    let response = next.run(request).await;
    scope.finish(response.status());
    response
}
