//! Admission control: per-key token buckets keyed by tenant and client IP.

use super::{client_ip, X_TENANT_ID};
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request).unwrap_or_else(|| "unknown".to_string());
    // Per-tenant limiting when the tenant header is present; the limiter
    // itself is oblivious to the key's structure.
    let key = request
        .headers()
        .get(&X_TENANT_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|t| !t.is_empty())
        .map_or_else(|| ip.clone(), |tenant| format!("{tenant}:{ip}"));

    let allowed = state.rate_limiter.allow(&key);
    state.metrics.record_rate_limit(allowed);
    if !allowed {
        tracing::warn!(key = %key, "rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "Rate limit exceeded"})),
        )
            .into_response();
    }

    next.run(request).await
}
