//! Route families and pipeline assembly.
//!
//! Families: `/auth/*` is public and dispatched directly to the auth
//! collaborator; `/api/{service}/*` is authenticated and dispatched to the
//! named upstream; `/page/{service}/*` maps to the `{service}-ui` upstream;
//! `/upload/*` is authenticated and fixed to `file-service`; anything else
//! falls back to slug dispatch (tenant default, else system default).

use crate::{
    middleware::{
        auth, client_ip, correlation_id, deadline, error_response, logger, metrics, permission,
        rate_limiting, recovery, validation,
    },
    state::AppState,
};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use portico_core::{
    config::CorsConfig,
    context::RequestContext,
    errors::ErrorKind,
    proxy::{DispatchOutcome, DispatchRequest, ProxyError, ServiceResolver},
};
use serde_json::json;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};

/// Response headers that belong to the gateway-upstream hop.
const HOP_BY_HOP_RESPONSE_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Assembles the full application.
///
/// The middleware stack is a strict total order. Axum applies layers in
/// reverse, so the first layer added here is the innermost stage and the
/// panic boundary is added last.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/:service", any(api_proxy_root))
        .route("/api/:service/*path", any(api_proxy))
        .route("/upload/*path", any(upload_proxy))
        // route_layer also applies in reverse: authentication runs before
        // the config-driven authorization check.
        .route_layer(from_fn_with_state(
            state.clone(),
            permission::service_authorization_middleware,
        ))
        .route_layer(from_fn_with_state(state.clone(), auth::auth_middleware));

    let public = Router::new()
        .route("/health", get(handle_health))
        .route("/ready", get(handle_ready))
        .route("/metrics", get(handle_metrics))
        .route("/auth/*path", any(auth_proxy))
        .route("/page/:service/*path", get(page_proxy))
        .fallback(slug_proxy);

    let mut router = public.merge(protected).with_state(state.clone());

    router = router.layer(from_fn_with_state(
        state.clone(),
        rate_limiting::rate_limit_middleware,
    ));
    router = router.layer(cors_layer(&state.config.cors));
    router = router.layer(from_fn_with_state(
        state.config.request_timeout(),
        deadline::deadline_middleware,
    ));
    router = router.layer(RequestBodyLimitLayer::new(state.config.server.max_request_size));
    router = router.layer(from_fn(validation::validation_middleware));
    router = router.layer(CompressionLayer::new());
    if state.config.metrics.enabled {
        router = router.layer(from_fn_with_state(
            state.metrics.clone(),
            metrics::metrics_middleware,
        ));
    }
    router = router.layer(from_fn(logger::logging_middleware));
    router = router.layer(from_fn(correlation_id::correlation_id_middleware));
    router.layer(from_fn(recovery::recovery_middleware))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let methods: Vec<Method> = config
        .allowed_methods
        .iter()
        .filter_map(|m| m.parse().ok())
        .collect();
    let headers: Vec<HeaderName> = config
        .allowed_headers
        .iter()
        .filter_map(|h| h.parse().ok())
        .collect();

    let mut layer = CorsLayer::new()
        .allow_methods(methods)
        .allow_headers(headers)
        .max_age(Duration::from_secs(config.max_age_seconds))
        .expose_headers([
            header::CONTENT_LENGTH,
            HeaderName::from_static("x-correlation-id"),
        ]);

    let wildcard = config.allowed_origins.iter().any(|o| o == "*");
    if wildcard {
        // A wildcard origin cannot carry credentials; downgrade rather
        // than panic at startup.
        if config.allow_credentials {
            tracing::warn!("CORS wildcard origin configured, disabling credentials");
        }
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer = layer.allow_origin(AllowOrigin::list(origins));
        layer.allow_credentials(config.allow_credentials)
    }
}

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.health.check_all().await;
    for (name, verdict) in &snapshot.services {
        state
            .metrics
            .record_dependency_health(name, verdict == "healthy");
    }
    let status = if snapshot.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(snapshot))
}

pub async fn handle_ready() -> impl IntoResponse {
    Json(json!({"status": "ready"}))
}

pub async fn handle_metrics(State(state): State<AppState>) -> Response {
    if !state.config.metrics.enabled {
        return StatusCode::NOT_FOUND.into_response();
    }
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.metrics.render(),
    )
        .into_response()
}

async fn api_proxy(
    State(state): State<AppState>,
    Path((service, _path)): Path<(String, String)>,
    request: Request,
) -> Response {
    proxy_to(state, service, request, true).await
}

async fn api_proxy_root(
    State(state): State<AppState>,
    Path(service): Path<String>,
    request: Request,
) -> Response {
    proxy_to(state, service, request, true).await
}

async fn page_proxy(
    State(state): State<AppState>,
    Path((service, _path)): Path<(String, String)>,
    request: Request,
) -> Response {
    proxy_to(state, ServiceResolver::ui_variant(&service), request, true).await
}

async fn upload_proxy(State(state): State<AppState>, request: Request) -> Response {
    proxy_to(state, "file-service".to_string(), request, true).await
}

/// Public auth family: dispatched directly with no failover, since the
/// failover chain itself terminates at `/auth/login`.
async fn auth_proxy(State(state): State<AppState>, request: Request) -> Response {
    proxy_to(state, "auth".to_string(), request, false).await
}

/// Slug fallback: the caller's tenant default service when authenticated,
/// else the system default.
async fn slug_proxy(State(state): State<AppState>, request: Request) -> Response {
    let service = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.principal.as_ref())
        .and_then(|principal| principal.default_service.clone())
        .unwrap_or_else(|| state.config.services.system_default.clone());
    proxy_to(state, service, request, true).await
}

async fn proxy_to(
    state: AppState,
    service: String,
    request: Request,
    failover: bool,
) -> Response {
    let ip = client_ip(&request);
    let (parts, body) = request.into_parts();

    let ctx = parts.extensions.get::<RequestContext>().cloned();
    let trace = ctx.as_ref().map(|c| c.correlation_id.to_string());
    let deadline = ctx.as_ref().and_then(|c| c.deadline);
    let tenant_default = ctx
        .as_ref()
        .and_then(|c| c.principal.as_ref())
        .and_then(|p| p.default_service.clone());

    // The body-limit layer's streaming bound surfaces here on overrun.
    let body = match axum::body::to_bytes(body, state.config.server.max_request_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(error = %e, "request body rejected");
            return error_response(
                StatusCode::BAD_REQUEST,
                ErrorKind::InvalidRequest,
                "request body too large or unreadable",
                None,
                trace,
            );
        }
    };

    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), |pq| pq.as_str().to_string());

    let dispatch = DispatchRequest {
        service: service.clone(),
        method: parts.method.clone(),
        path_and_query,
        headers: parts.headers.clone(),
        body,
        client_ip: ip,
        deadline,
        tenant_default,
    };

    if failover {
        match state.dispatcher.dispatch(dispatch).await {
            Ok(DispatchOutcome::Upstream(response)) => upstream_response(response),
            Ok(DispatchOutcome::Redirect(location)) => redirect_response(&location, trace),
            Err(e) => proxy_error_response(&e, trace),
        }
    } else {
        match state.dispatcher.dispatch_direct(&service, &dispatch).await {
            Ok(response) => upstream_response(response),
            Err(e) => proxy_error_response(&e, trace),
        }
    }
}

/// Streams an upstream response back unmodified, minus hop-by-hop headers.
fn upstream_response(response: reqwest::Response) -> Response {
    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::with_capacity(response.headers().len());
    for (name, value) in response.headers() {
        if HOP_BY_HOP_RESPONSE_HEADERS.contains(&name.as_str())
            || name == &header::CONTENT_LENGTH
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let mut builder = Response::builder().status(status);
    if let Some(builder_headers) = builder.headers_mut() {
        *builder_headers = headers;
    }
    builder
        .body(Body::from_stream(response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}

fn redirect_response(location: &str, trace: Option<String>) -> Response {
    let Ok(value) = HeaderValue::from_str(location) else {
        return error_response(
            StatusCode::BAD_GATEWAY,
            ErrorKind::UpstreamUnavailable,
            "failover redirect could not be constructed",
            None,
            trace,
        );
    };
    (StatusCode::FOUND, [(header::LOCATION, value)]).into_response()
}

fn proxy_error_response(error: &ProxyError, trace: Option<String>) -> Response {
    let (status, kind) = match error {
        ProxyError::UnresolvedService(_) | ProxyError::Connect(_) => {
            (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamUnavailable)
        }
        ProxyError::BreakerOpen => (
            StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::UpstreamUnavailable,
        ),
        ProxyError::Timeout | ProxyError::DeadlineExceeded => {
            (StatusCode::GATEWAY_TIMEOUT, ErrorKind::Timeout)
        }
        ProxyError::UpstreamStatus(_) => (StatusCode::BAD_GATEWAY, ErrorKind::UpstreamError),
        ProxyError::Body(_) => (StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, ErrorKind::Internal),
    };
    error_response(status, kind, error.to_string(), None, trace)
}
