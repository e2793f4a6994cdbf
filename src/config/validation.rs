//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, sample ratio within [0, 1])
//! - Check that histogram buckets are usable as fixed boundaries
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use axum::http::Uri;

use crate::config::schema::ServiceConfig;

/// A single semantic problem with a loaded configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field (e.g., "telemetry.sample_ratio").
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.service.name.trim().is_empty() {
        errors.push(ValidationError::new("service.name", "must not be empty"));
    }

    if !config.service.route.starts_with('/') {
        errors.push(ValidationError::new(
            "service.route",
            format!("'{}' must start with '/'", config.service.route),
        ));
    }

    if let Some(url) = &config.service.downstream_url {
        match url.parse::<Uri>() {
            Ok(uri) if uri.scheme_str() == Some("http") && uri.authority().is_some() => {}
            _ => errors.push(ValidationError::new(
                "service.downstream_url",
                format!("'{}' is not an absolute http:// URL", url),
            )),
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.downstream_secs == 0 {
        errors.push(ValidationError::new("timeouts.downstream_secs", "must be greater than 0"));
    }

    let telemetry = &config.telemetry;
    if telemetry.export_period_secs == 0 {
        errors.push(ValidationError::new("telemetry.export_period_secs", "must be greater than 0"));
    }
    if telemetry.export_timeout_secs == 0 {
        errors.push(ValidationError::new("telemetry.export_timeout_secs", "must be greater than 0"));
    }
    if !(0.0..=1.0).contains(&telemetry.sample_ratio) {
        errors.push(ValidationError::new(
            "telemetry.sample_ratio",
            format!("{} is outside [0, 1]", telemetry.sample_ratio),
        ));
    }

    let buckets = &telemetry.histogram_buckets;
    if buckets.iter().any(|b| !b.is_finite() || *b <= 0.0) {
        errors.push(ValidationError::new(
            "telemetry.histogram_buckets",
            "boundaries must be finite and positive",
        ));
    } else if buckets.windows(2).any(|w| w[0] >= w[1]) {
        errors.push(ValidationError::new(
            "telemetry.histogram_buckets",
            "boundaries must be strictly ascending",
        ));
    }

    let batch = &telemetry.batch;
    if batch.max_queue_size == 0 {
        errors.push(ValidationError::new("telemetry.batch.max_queue_size", "must be greater than 0"));
    }
    if batch.max_export_batch_size == 0 {
        errors.push(ValidationError::new(
            "telemetry.batch.max_export_batch_size",
            "must be greater than 0",
        ));
    } else if batch.max_export_batch_size > batch.max_queue_size {
        errors.push(ValidationError::new(
            "telemetry.batch.max_export_batch_size",
            "must not exceed max_queue_size",
        ));
    }
    if batch.scheduled_delay_ms == 0 {
        errors.push(ValidationError::new("telemetry.batch.scheduled_delay_ms", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
