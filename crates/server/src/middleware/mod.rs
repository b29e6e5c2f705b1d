//! The request-scoped middleware pipeline.
//!
//! Stage order is a strict total contract (outermost first): recovery,
//! correlation id, logger, metrics, compression, validation, size limit,
//! deadline, CORS, rate limit, authenticate, authorize. The router applies
//! the layers; reordering them breaks the stage contracts.

pub mod auth;
pub mod correlation_id;
pub mod deadline;
pub mod logger;
pub mod metrics;
pub mod permission;
pub mod rate_limiting;
pub mod recovery;
pub mod validation;

use axum::{
    extract::{ConnectInfo, Request},
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use portico_core::{
    context::RequestContext,
    errors::{ErrorKind, ErrorResponse},
};
use serde_json::Value;
use std::net::SocketAddr;

pub static X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub static X_TENANT_ID: HeaderName = HeaderName::from_static("x-tenant-id");
pub static X_INTERNAL_TOKEN: HeaderName = HeaderName::from_static("x-internal-token");

/// The caller's IP: the first `X-Forwarded-For` entry when present, else
/// the peer address.
#[must_use]
pub fn client_ip(request: &Request) -> Option<String> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return Some(first.to_string());
            }
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// The bound request context, when the correlation-id stage has run.
#[must_use]
pub fn request_context(request: &Request) -> Option<&RequestContext> {
    request.extensions().get::<RequestContext>()
}

/// The request's correlation id for error envelopes.
#[must_use]
pub fn trace_id(request: &Request) -> Option<String> {
    request_context(request).map(|ctx| ctx.correlation_id.to_string())
}

/// Builds a gateway error response in the standard envelope.
pub fn error_response(
    status: StatusCode,
    kind: ErrorKind,
    message: impl Into<String>,
    details: Option<Value>,
    trace_id: Option<String>,
) -> Response {
    let mut envelope = ErrorResponse::new(kind, message);
    if let Some(details) = details {
        envelope = envelope.with_details(details);
    }
    if let Some(trace_id) = trace_id {
        envelope = envelope.with_trace_id(trace_id);
    }
    (status, Json(envelope)).into_response()
}
