//! Correlation-id binding for end-to-end request tracing.
//!
//! Echoes the client's `X-Correlation-ID` or generates one, binds the
//! request context, and mirrors the id to both the upstream-bound request
//! headers and the response.

use super::X_CORRELATION_ID;
use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use portico_core::context::{CorrelationId, RequestContext};

pub async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(&X_CORRELATION_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(CorrelationId::generate, CorrelationId::new);

    // Mirror into the request headers so the dispatcher always forwards it.
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        request
            .headers_mut()
            .insert(X_CORRELATION_ID.clone(), value);
    }
    request
        .extensions_mut()
        .insert(RequestContext::new(correlation_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response
            .headers_mut()
            .insert(X_CORRELATION_ID.clone(), value);
    }
    response
}
