//! Per-request deadline.
//!
//! The deadline is bound to the request context so downstream calls
//! (upstream, cache, auth) can derive their remaining budget, and the
//! downstream future itself is bounded in-line. Because responses are
//! values here, nothing has been written when the timeout fires, so the
//! 504 is always the only writer.

use super::{error_response, trace_id};
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use portico_core::{context::RequestContext, errors::ErrorKind};
use std::time::{Duration, Instant};

pub async fn deadline_middleware(
    State(timeout): State<Duration>,
    mut request: Request,
    next: Next,
) -> Response {
    let deadline = Instant::now() + timeout;
    let trace = trace_id(&request);
    if let Some(ctx) = request.extensions_mut().get_mut::<RequestContext>() {
        ctx.deadline = Some(deadline);
    }

    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => error_response(
            StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Timeout,
            "Request timeout exceeded",
            None,
            trace,
        ),
    }
}
