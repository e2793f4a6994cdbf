//! Failure injection tests: every failure path still yields exactly one ended span.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{routing::get, Router};
use trace_relay::observability::export::{ExportError, InMemorySpanExporter, SpanExporter};
use trace_relay::observability::metrics::{LabelSet, HTTP_REQUEST_DURATION_SECONDS};
use trace_relay::observability::span::{AttributeValue, SpanData, SpanError, SpanStatus};
use trace_relay::observability::Resource;
use trace_relay::http::instrumented;

mod common;

struct RejectingCollector;

#[async_trait]
impl SpanExporter for RejectingCollector {
    async fn export(&self, _resource: &Resource, _batch: Vec<SpanData>) -> Result<(), ExportError> {
        Err(ExportError::Status(503))
    }
}

#[tokio::test]
async fn test_unreachable_downstream_returns_500() {
    let a = common::spawn_service(common::service_config(
        "service-a",
        "/a",
        Some("http://127.0.0.1:1/b".to_string()),
    ))
    .await;

    let res = common::client().get(a.url("/a")).send().await.unwrap();
    assert_eq!(res.status(), 500);
    let content_type = res.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert!(res.text().await.unwrap().contains("downstream request failed"));

    a.telemetry.force_flush().await;
    let spans = a.spans.spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert!(span.end_time.is_some());
    assert_eq!(span.attribute("http.status_code"), Some(&AttributeValue::Int(500)));
    assert_eq!(span.attribute("error"), Some(&AttributeValue::Bool(true)));

    let latency = a.telemetry.meter().snapshot();
    let point = latency
        .histogram(HTTP_REQUEST_DURATION_SECONDS, &LabelSet::http("GET", "/a"))
        .unwrap();
    assert_eq!(point.count, 1, "latency recorded on the failure path");
}

#[tokio::test]
async fn test_panicking_handler_ends_span_once() {
    let config = common::service_config("service-a", "/boom", None);
    let spans = InMemorySpanExporter::default();
    let (telemetry, _metrics) = common::test_telemetry(&config, Arc::new(spans.clone()));

    let router = Router::new().route(
        "/boom",
        get(|| async {
            if true {
                panic!("handler exploded");
            }
            ""
        }),
    );
    let addr = common::serve_router(instrumented(router, telemetry.clone(), Duration::from_secs(5))).await;

    let res = common::client()
        .get(format!("http://{}/boom", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);

    telemetry.force_flush().await;
    let exported = spans.spans();
    assert_eq!(exported.len(), 1);
    assert!(exported[0].end_time.is_some());
    assert_eq!(exported[0].attribute("error"), Some(&AttributeValue::Bool(true)));
    assert!(matches!(exported[0].status, SpanStatus::Error(_)));
}

#[tokio::test]
async fn test_timed_out_request_ends_span() {
    let config = common::service_config("service-a", "/slow", None);
    let spans = InMemorySpanExporter::default();
    let (telemetry, _metrics) = common::test_telemetry(&config, Arc::new(spans.clone()));

    let router = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            "late"
        }),
    );
    let addr = common::serve_router(instrumented(router, telemetry.clone(), Duration::from_millis(100))).await;

    let res = common::client()
        .get(format!("http://{}/slow", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 408);

    telemetry.force_flush().await;
    let exported = spans.spans();
    assert_eq!(exported.len(), 1);
    assert!(exported[0].end_time.is_some());
    assert_eq!(
        exported[0].status,
        SpanStatus::Error("request did not complete".to_string())
    );
}

#[tokio::test]
async fn test_double_end_is_detected() {
    let config = common::service_config("service-a", "/a", None);
    let spans = InMemorySpanExporter::default();
    let (telemetry, _metrics) = common::test_telemetry(&config, Arc::new(spans.clone()));

    let tracer = telemetry.tracer();
    let mut span = tracer.start(None, "GET /a");
    assert!(tracer.end(&mut span).is_ok());
    let second = tracer.end(&mut span);
    assert!(matches!(second, Err(SpanError::AlreadyEnded { .. })));

    telemetry.force_flush().await;
    assert_eq!(spans.spans().len(), 1, "second end submits nothing");
    assert_eq!(telemetry.span_processor().dropped_count(), 0);
}

#[tokio::test]
async fn test_failing_collector_never_reaches_request_path() {
    let config = common::service_config("service-b", "/b", None);
    let (telemetry, _metrics) = common::test_telemetry(&config, Arc::new(RejectingCollector));

    let router = Router::new().route("/b", get(|| async { "ok" }));
    let addr = common::serve_router(instrumented(router, telemetry.clone(), Duration::from_secs(5))).await;

    let client = common::client();
    for _ in 0..3 {
        let res = client.get(format!("http://{}/b", addr)).send().await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.text().await.unwrap(), "ok");
    }

    telemetry.force_flush().await;
    assert!(telemetry.span_processor().failed_batch_count() >= 1);
    assert_eq!(telemetry.span_processor().exported_count(), 0);
}
