//! Downstream HTTP client with trace context propagation.
//!
//! Every outbound request is built through [`DownstreamClient::outbound_request`],
//! which injects the caller's context as a `traceparent` header. The receiving
//! service continues the trace with the caller's span as parent.

use std::time::Duration;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

use crate::observability::{propagation, TraceContext};

#[derive(Debug, Error)]
pub enum DownstreamError {
    #[error("invalid downstream URI '{0}'")]
    InvalidUri(String),

    #[error("downstream request failed: {0}")]
    Request(String),

    #[error("downstream request timed out after {0:?}")]
    Timeout(Duration),
}

impl IntoResponse for DownstreamError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Downstream call failed");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{}\n", self)).into_response()
    }
}

/// HTTP client for the next service in the chain.
#[derive(Clone)]
pub struct DownstreamClient {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl DownstreamClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Build a request carrying `ctx` in its headers.
    pub fn outbound_request(
        ctx: &TraceContext,
        method: Method,
        uri: Uri,
    ) -> Result<Request<Body>, DownstreamError> {
        let mut request = Request::builder()
            .method(method)
            .uri(uri.clone())
            .body(Body::empty())
            .map_err(|_| DownstreamError::InvalidUri(uri.to_string()))?;

        propagation::inject(ctx, request.headers_mut());

        tracing::debug!(
            uri = %uri,
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            "Injected trace context"
        );
        Ok(request)
    }

    /// GET `url` on behalf of the request identified by `ctx` and return the body.
    ///
    /// The body is returned whatever the downstream status. It is streamed
    /// through unbuffered; the timeout covers dispatch and response headers.
    pub async fn get(&self, ctx: &TraceContext, url: &str) -> Result<Body, DownstreamError> {
        let uri: Uri = url
            .parse()
            .map_err(|_| DownstreamError::InvalidUri(url.to_string()))?;
        let request = Self::outbound_request(ctx, Method::GET, uri)?;

        let dispatch = tokio::time::timeout(self.timeout, self.client.request(request));
        let response: hyper::Response<Incoming> = match dispatch.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(DownstreamError::Request(e.to_string())),
            Err(_) => return Err(DownstreamError::Timeout(self.timeout)),
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(url = %url, status = %status, "Downstream responded");
        } else {
            tracing::warn!(url = %url, status = %status, "Downstream returned non-success status");
        }
        Ok(Body::new(response.into_body()))
    }
}
