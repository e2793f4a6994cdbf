//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the relay handler
//! - Wire up middleware (instrumentation, panic capture, timeout, tracing)
//! - Bind server to listener
//! - Drain in-flight requests on shutdown

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tower_http::{catch_panic::CatchPanicLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::ServiceConfig;
use crate::http::handlers::{relay, RelayState};
use crate::http::middleware::instrument;
use crate::lifecycle::ShutdownSignal;
use crate::observability::Telemetry;

/// HTTP server for one service in the chain.
pub struct HttpServer {
    router: Router,
    config: ServiceConfig,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServiceConfig, telemetry: Arc<Telemetry>) -> Self {
        let router = Self::build_router(&config, telemetry);
        Self { router, config }
    }

    fn build_router(config: &ServiceConfig, telemetry: Arc<Telemetry>) -> Router {
        let routes = Router::new()
            .route(&config.service.route, get(relay))
            .with_state(RelayState::from_config(config));

        instrumented(
            routes,
            telemetry,
            Duration::from_secs(config.timeouts.request_secs),
        )
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: ShutdownSignal,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            service = %self.config.service.name,
            route = %self.config.service.route,
            downstream = self.config.service.downstream_url.as_deref().unwrap_or("none"),
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown.wait().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Wrap `router` in the instrumentation stack.
///
/// Layer order, innermost first: instrumentation, panic capture, request
/// timeout, request tracing. Panics and timeouts therefore reach the
/// instrumentation as an unwinding or dropped request future.
#[allow(deprecated)]
pub fn instrumented(router: Router, telemetry: Arc<Telemetry>, request_timeout: Duration) -> Router {
    router
        .layer(axum::middleware::from_fn_with_state(telemetry, instrument))
        .layer(CatchPanicLayer::new())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}
