//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use trace_relay::config::ServiceConfig;
use trace_relay::observability::export::{InMemoryMetricExporter, InMemorySpanExporter, SpanExporter};
use trace_relay::observability::Resource;
use trace_relay::{HttpServer, Shutdown, Telemetry};

/// A relay service running on an ephemeral port with in-memory exporters.
pub struct TestService {
    pub addr: SocketAddr,
    pub telemetry: Arc<Telemetry>,
    pub spans: InMemorySpanExporter,
    pub metrics: InMemoryMetricExporter,
    pub shutdown: Shutdown,
}

impl TestService {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub fn service_config(name: &str, route: &str, downstream: Option<String>) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.service.name = name.to_string();
    config.service.route = route.to_string();
    config.service.downstream_url = downstream;
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.timeouts.downstream_secs = 2;
    config
}

pub fn test_telemetry(config: &ServiceConfig, spans: Arc<dyn SpanExporter>) -> (Arc<Telemetry>, InMemoryMetricExporter) {
    let metrics = InMemoryMetricExporter::default();
    let telemetry = Telemetry::with_exporters(
        Resource::new(&config.service.name, &config.service.version),
        &config.telemetry,
        spans,
        Arc::new(metrics.clone()),
    )
    .unwrap();
    (Arc::new(telemetry), metrics)
}

/// Start a relay service built from `config`.
pub async fn spawn_service(config: ServiceConfig) -> TestService {
    let spans = InMemorySpanExporter::default();
    let (telemetry, metrics) = test_telemetry(&config, Arc::new(spans.clone()));

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config, telemetry.clone());
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestService {
        addr,
        telemetry,
        spans,
        metrics,
        shutdown,
    }
}

/// Start a terminal service B and a relay A pointing at it.
pub async fn spawn_chain() -> (TestService, TestService) {
    let b = spawn_service(service_config("service-b", "/b", None)).await;
    let a = spawn_service(service_config("service-a", "/a", Some(b.url("/b")))).await;
    (a, b)
}

/// Serve an arbitrary router on an ephemeral port.
pub async fn serve_router(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// Start a raw backend that records each request head and answers `response`.
pub async fn start_capturing_backend(
    response: impl Into<Arc<str>>,
) -> (SocketAddr, Arc<Mutex<Vec<String>>>) {
    let response: Arc<str> = response.into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let heads = Arc::new(Mutex::new(Vec::new()));
    let captured = heads.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let captured = captured.clone();
                    let response = response.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        captured
                            .lock()
                            .unwrap()
                            .push(String::from_utf8_lossy(&buf[..n]).to_string());

                        let response_str = format!(
                            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            response.len(),
                            response
                        );
                        let _ = socket.write_all(response_str.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, heads)
}

/// Value of `name` in a raw request head, matched case-insensitively.
pub fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim().to_string())
    })
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
