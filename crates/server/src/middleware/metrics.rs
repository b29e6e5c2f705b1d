//! Request metrics: in-flight gauge plus count and duration series keyed
//! by (method, route template, status).

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use portico_core::metrics::MetricsCollector;
use std::{sync::Arc, time::Instant};

/// Decrements the active-request gauge even when a later stage unwinds.
struct ActiveGuard(Arc<MetricsCollector>);

impl ActiveGuard {
    fn new(metrics: Arc<MetricsCollector>) -> Self {
        metrics.inc_active_requests();
        Self(metrics)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.dec_active_requests();
    }
}

pub async fn metrics_middleware(
    State(metrics): State<Arc<MetricsCollector>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    // The route template keeps cardinality bounded; raw paths are only
    // used for requests that matched no route.
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |m| m.as_str().to_string());

    let _guard = ActiveGuard::new(Arc::clone(&metrics));
    let response = next.run(request).await;

    metrics.record_http_request(
        &method,
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
