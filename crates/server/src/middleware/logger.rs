//! Structured access logging: one line per response.

use super::{client_ip, trace_id};
use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or("").to_string();
    let ip = client_ip(&request).unwrap_or_default();
    let user_agent = request
        .headers()
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let correlation_id = trace_id(&request).unwrap_or_default();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        path = %path,
        query = %query,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        ip = %ip,
        user_agent = %user_agent,
        correlation_id = %correlation_id,
        "request completed"
    );
    response
}
