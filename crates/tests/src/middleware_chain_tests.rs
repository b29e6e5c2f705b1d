//! Middleware chain ordering and interaction tests.
//!
//! The pipeline is a strict total order; these tests pin the observable
//! consequences: validation rejects before rate limiting counts, rate
//! limiting rejects before authentication runs, authentication rejects
//! before the upstream is touched, and every response carries the
//! correlation id.

use crate::mock_infrastructure::{
    build_state, gateway_config, sample_record, send, MockAuthApi, MockUpstream,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use server::build_router;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};
use uuid::Uuid;

fn client_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .expect("request builds")
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&body).expect("json body")
}

fn app_with(config: portico_core::config::AppConfig) -> (Router, Arc<MockAuthApi>) {
    let auth = Arc::new(MockAuthApi::new("valid-token", sample_record()));
    let state = build_state(config, auth.clone());
    (build_router(state), auth)
}

#[tokio::test]
async fn test_supplied_correlation_id_is_echoed_verbatim() {
    let (app, _) = app_with(gateway_config(&[]));

    let mut request = get("/ready");
    request
        .headers_mut()
        .insert("x-correlation-id", "trace-me-42".parse().unwrap());
    let response = send(&app, request).await;

    assert_eq!(
        response.headers().get("x-correlation-id").unwrap(),
        "trace-me-42"
    );
}

#[tokio::test]
async fn test_generated_correlation_id_is_a_uuid() {
    let (app, _) = app_with(gateway_config(&[]));

    let response = send(&app, get("/ready")).await;
    let id = response
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .expect("correlation id present");
    assert!(Uuid::parse_str(id).is_ok(), "not a uuid: {id}");
}

#[tokio::test]
async fn test_unauthenticated_api_request_never_touches_upstream() {
    let upstream = MockUpstream::start_ok().await;
    let (app, _) = app_with(gateway_config(&[("user", &upstream.url())]));

    let response = send(&app, get("/api/user/profile")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.hits(), 0);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_rate_limit_runs_before_authentication() {
    let mut config = gateway_config(&[]);
    config.rate_limit.rps = 0.001;
    config.rate_limit.burst = 1;
    let (app, _) = app_with(config);

    // First request passes admission and fails authentication.
    let first = send(&app, get("/api/user/profile")).await;
    assert_eq!(first.status(), StatusCode::UNAUTHORIZED);

    // Second request is rejected by the rate limiter before the
    // authentication stage can even look at the missing header.
    let second = send(&app, get("/api/user/profile")).await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = body_json(second).await;
    assert_eq!(body, serde_json::json!({"error": "Rate limit exceeded"}));
}

#[tokio::test]
async fn test_validation_runs_before_rate_limiting() {
    let mut config = gateway_config(&[]);
    config.rate_limit.rps = 0.001;
    config.rate_limit.burst = 1;
    let (app, _) = app_with(config);

    // Bodyless POSTs are rejected by validation (stage 6) and therefore
    // never consume rate-limit tokens (stage 10).
    for _ in 0..3 {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/user/profile")
            .extension(ConnectInfo(client_addr()))
            .body(Body::empty())
            .unwrap();
        let response = send(&app, request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["code"], "INVALID_REQUEST");
    }
}

#[tokio::test]
async fn test_deadline_yields_504_envelope() {
    let upstream =
        MockUpstream::start_with_delay(StatusCode::OK, "late", Duration::from_secs(5)).await;
    let mut config = gateway_config(&[("auth", &upstream.url())]);
    config.server.request_timeout_seconds = 1;
    let (app, _) = app_with(config);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header("content-type", "application/json")
        .extension(ConnectInfo(client_addr()))
        .body(Body::from("{}"))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["code"], "TIMEOUT");
}

#[tokio::test]
async fn test_request_size_boundary() {
    let upstream = MockUpstream::start_ok().await;
    let mut config = gateway_config(&[("auth", &upstream.url())]);
    config.server.max_request_size = 64;
    let (app, _) = app_with(config);

    let post = |body: Vec<u8>| {
        Request::builder()
            .method(Method::POST)
            .uri("/auth/login")
            .header("content-type", "application/octet-stream")
            .extension(ConnectInfo(client_addr()))
            .body(Body::from(body))
            .unwrap()
    };

    // Exactly the limit is admitted and forwarded.
    let response = send(&app, post(vec![b'a'; 64])).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);

    // One byte over is rejected before dispatch.
    let response = send(&app, post(vec![b'a'; 65])).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(upstream.hits(), 1);
    let body = body_json(response).await;
    assert_eq!(body["code"], "INVALID_REQUEST");
}
