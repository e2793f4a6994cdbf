//! Trace relay service (v1)
//!
//! One link of an instrumented HTTP service chain, built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!   caller ──traceparent──▶ ┌──────────────────────────────────────┐ ──traceparent──▶ downstream
//!                           │  middleware: extract, span, count    │
//!                           │  handler:    relay or greet          │
//!                           │  client:     inject, call            │
//!                           │  middleware: latency, end span       │
//!                           └───────────────┬──────────────────────┘
//!                                           │
//!                      Telemetry ── BatchSpanProcessor ──▶ SpanExporter
//!                                └─ PeriodicReader ─────▶ MetricExporter
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use trace_relay::config::{load_config, validation::validate_config, ConfigError, ServiceConfig};
use trace_relay::lifecycle::{signals, Shutdown};
use trace_relay::observability::{internal, logging};
use trace_relay::{HttpServer, Telemetry};

#[derive(Parser, Debug)]
#[command(name = "trace-relay", version, about = "Trace-propagating HTTP relay service")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listener bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Override the downstream URL
    #[arg(short, long)]
    downstream: Option<String>,
}

fn resolve_config(cli: &Cli) -> Result<ServiceConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServiceConfig::default(),
    };

    if let Some(bind) = &cli.bind {
        config.listener.bind_address = bind.clone();
    }
    if let Some(downstream) = &cli.downstream {
        config.service.downstream_url = Some(downstream.clone());
    }

    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    logging::init_logging(&config.service.name, &config.observability);

    tracing::info!(
        service = %config.service.name,
        version = %config.service.version,
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => internal::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let telemetry = Arc::new(Telemetry::from_config(&config)?);

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_listener(shutdown.clone());

    let server = HttpServer::new(config, telemetry.clone());
    server.run(listener, shutdown.subscribe()).await?;

    telemetry.shutdown().await;
    tracing::info!("Shutdown complete");
    Ok(())
}
