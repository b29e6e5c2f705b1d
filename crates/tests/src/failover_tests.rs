//! Failover chain and circuit breaker integration tests.

use crate::mock_infrastructure::{
    build_state, gateway_config, sample_record, send, MockAuthApi, MockUpstream,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use portico_core::{auth::VerifiedToken, breaker::BreakerState};
use server::{build_router, AppState};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

fn client_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)), 40000)
}

fn authed_get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", "Bearer opaque-valid")
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .expect("request builds")
}

fn record_with_default_service(service: Option<&str>) -> VerifiedToken {
    let mut record = sample_record();
    if let Some(service) = service {
        record
            .metadata
            .insert("default_service".to_string(), service.to_string());
    }
    record
}

fn app_for(
    targets: &[(&str, &str)],
    record: VerifiedToken,
) -> (Router, AppState) {
    let config = gateway_config(targets);
    let auth = Arc::new(MockAuthApi::new("opaque-valid", record));
    let state = build_state(config, auth);
    (build_router(state.clone()), state)
}

#[tokio::test]
async fn test_unresolved_primary_fails_over_to_tenant_default() {
    let fallback = MockUpstream::start_ok().await;
    let (app, _) = app_for(
        &[("cms-service", &fallback.url())],
        record_with_default_service(Some("cms-service")),
    );

    let response = send(&app, authed_get("/api/ghost-zone/data")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fallback.hits(), 1);
    // The original request line is preserved across the failover hop.
    assert_eq!(
        fallback.last_request().expect("hit recorded").path,
        "/api/ghost-zone/data"
    );
}

#[tokio::test]
async fn test_chain_falls_through_to_system_default() {
    let dashboard = MockUpstream::start_ok().await;
    let (app, _) = app_for(
        &[("dashboard-service", &dashboard.url())],
        record_with_default_service(Some("also-missing")),
    );

    let response = send(&app, authed_get("/api/ghost-zone/data")).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(dashboard.hits(), 1);
}

#[tokio::test]
async fn test_exhausted_chain_redirects_to_login() {
    let (app, _) = app_for(&[], record_with_default_service(None));

    let response = send(&app, authed_get("/api/ghost-zone/data")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .expect("redirect location");
    assert!(
        location.starts_with("/auth/login?error="),
        "unexpected location: {location}"
    );
}

#[tokio::test]
async fn test_each_failover_candidate_is_dispatched_once() {
    // Both fallbacks answer 503, which is at the failover threshold, so
    // the chain walks through them and must not revisit either.
    let cms = MockUpstream::start(StatusCode::SERVICE_UNAVAILABLE, "down").await;
    let dashboard = MockUpstream::start(StatusCode::SERVICE_UNAVAILABLE, "down").await;
    let (app, _) = app_for(
        &[
            ("cms-service", &cms.url()),
            ("dashboard-service", &dashboard.url()),
        ],
        record_with_default_service(Some("cms-service")),
    );

    let response = send(&app, authed_get("/api/ghost-zone/data")).await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(cms.hits(), 1, "tenant default dispatched more than once");
    assert_eq!(dashboard.hits(), 1, "system default dispatched more than once");
}

#[tokio::test]
async fn test_forwarded_5xx_below_threshold_is_not_failed_over() {
    // 500 is an application error: forwarded unmodified, no failover.
    let user = MockUpstream::start(StatusCode::INTERNAL_SERVER_ERROR, "app error").await;
    let fallback = MockUpstream::start_ok().await;
    let (app, _) = app_for(
        &[("user", &user.url()), ("cms-service", &fallback.url())],
        record_with_default_service(Some("cms-service")),
    );

    let response = send(&app, authed_get("/api/user/profile")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(user.hits(), 1);
    assert_eq!(fallback.hits(), 0);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"app error");
}

#[tokio::test]
async fn test_breaker_opens_after_three_transport_failures() {
    // Nothing listens on port 1: every dispatch is a connection error.
    let (app, state) = app_for(
        &[("user", "http://127.0.0.1:1")],
        record_with_default_service(None),
    );

    for i in 0..3 {
        let response = send(&app, authed_get("/api/user/profile")).await;
        // No fallback configured: the chain exhausts into a redirect.
        assert_eq!(response.status(), StatusCode::FOUND, "request {i}");
    }
    assert_eq!(
        state.breakers.state_of("user").await,
        Some(BreakerState::Open)
    );

    // While open the upstream is not dialed; the rejection is immediate.
    let response = send(&app, authed_get("/api/user/profile")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let counts = state.breakers.breaker("user").counts().await;
    assert_eq!(counts.requests, 0, "open breaker admitted a call");
}

#[tokio::test]
async fn test_breaker_admits_probe_after_cooldown() {
    let mut config = gateway_config(&[("user", "http://127.0.0.1:1")]);
    config.breaker.cooldown_seconds = 1;
    let auth = Arc::new(MockAuthApi::new(
        "opaque-valid",
        record_with_default_service(None),
    ));
    let state = build_state(config, auth);
    let app = build_router(state.clone());

    for _ in 0..3 {
        send(&app, authed_get("/api/user/profile")).await;
    }
    assert_eq!(
        state.breakers.state_of("user").await,
        Some(BreakerState::Open)
    );

    tokio::time::sleep(Duration::from_millis(1200)).await;

    // The next call is admitted as a probe; it fails against the dead
    // upstream and reopens the breaker.
    send(&app, authed_get("/api/user/profile")).await;
    assert_eq!(
        state.breakers.state_of("user").await,
        Some(BreakerState::Open)
    );
}

#[tokio::test]
async fn test_breaker_open_skips_straight_to_fallback() {
    let fallback = MockUpstream::start_ok().await;
    let (app, state) = app_for(
        &[
            ("user", "http://127.0.0.1:1"),
            ("cms-service", &fallback.url()),
        ],
        record_with_default_service(Some("cms-service")),
    );

    // Trip the breaker for the primary.
    for _ in 0..3 {
        send(&app, authed_get("/api/user/profile")).await;
    }
    assert_eq!(
        state.breakers.state_of("user").await,
        Some(BreakerState::Open)
    );
    let fallback_hits = fallback.hits();

    // The open breaker short-circuits and the fallback serves the request.
    let response = send(&app, authed_get("/api/user/profile")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fallback.hits(), fallback_hits + 1);
}
