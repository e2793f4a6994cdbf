//! Relay endpoint.
//!
//! A service with a downstream URL calls it and returns the body verbatim.
//! A terminal service answers with its configured greeting.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::header,
    response::{IntoResponse, Response},
    Extension,
};

use crate::config::ServiceConfig;
use crate::http::client::{DownstreamClient, DownstreamError};
use crate::observability::TraceContext;

#[derive(Clone)]
pub struct RelayState {
    pub downstream_url: Option<Arc<str>>,
    pub greeting: Arc<str>,
    pub client: DownstreamClient,
}

impl RelayState {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            downstream_url: config.service.downstream_url.as_deref().map(Arc::from),
            greeting: Arc::from(config.service.greeting()),
            client: DownstreamClient::new(std::time::Duration::from_secs(
                config.timeouts.downstream_secs,
            )),
        }
    }
}

pub async fn relay(
    State(state): State<RelayState>,
    Extension(ctx): Extension<TraceContext>,
) -> Result<Response, DownstreamError> {
    let body = match &state.downstream_url {
        Some(url) => state.client.get(&ctx, url).await?,
        None => Body::from(state.greeting.to_string()),
    };

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}
