//! Authentication, token caching, header injection, and route families.

use crate::mock_infrastructure::{
    build_state, gateway_config, sample_record, send, MockAuthApi, MockUpstream,
};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Method, Request, StatusCode},
    Router,
};
use portico_core::auth::InternalTokenSigner;
use serde_json::Value;
use server::build_router;
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Duration,
};

fn client_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)), 40000)
}

fn authed_get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .header("x-correlation-id", "corr-e2e-1")
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .expect("request builds")
}

fn app_with(
    config: portico_core::config::AppConfig,
    auth: Arc<MockAuthApi>,
) -> Router {
    build_router(build_state(config, auth))
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&body).expect("json body")
}

#[tokio::test]
async fn test_happy_authenticated_read() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(gateway_config(&[("user", &upstream.url())]), auth);

    let response = send(&app, authed_get("/api/user/profile", "opaque-valid")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);

    let seen = upstream.last_request().expect("upstream saw the request");
    assert_eq!(seen.method, Method::GET);
    // Path preserved byte-for-byte.
    assert_eq!(seen.path, "/api/user/profile");
    // Internal headers injected by the gateway.
    assert_eq!(seen.headers.get("x-tenant-id").unwrap(), "tenant-456");
    assert_eq!(seen.headers.get("x-correlation-id").unwrap(), "corr-e2e-1");
    assert_eq!(
        seen.headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok()),
        Some("198.51.100.7")
    );

    // The internal token is a verifiable claims envelope over the principal.
    let internal = seen
        .headers
        .get("x-internal-token")
        .and_then(|v| v.to_str().ok())
        .expect("internal token forwarded");
    let signer = InternalTokenSigner::new(
        crate::mock_infrastructure::TEST_JWT_SECRET,
        Duration::from_secs(300),
    );
    let claims = signer.decode(internal).expect("internal token decodes");
    assert_eq!(claims.sub, "user-123");
    assert_eq!(claims.tenant_id, "tenant-456");
    assert_eq!(claims.permissions, vec!["user.read", "user.write"]);
}

#[tokio::test]
async fn test_token_cache_serves_second_request() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(gateway_config(&[("user", &upstream.url())]), auth.clone());

    send(&app, authed_get("/api/user/profile", "opaque-valid")).await;
    send(&app, authed_get("/api/user/profile", "opaque-valid")).await;

    assert_eq!(upstream.hits(), 2);
    // The collaborator was only consulted once; the second verification
    // was served from the cache.
    assert_eq!(auth.verify_calls(), 1);
}

#[tokio::test]
async fn test_invalid_token_is_rejected_before_upstream() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(gateway_config(&[("user", &upstream.url())]), auth);

    let response = send(&app, authed_get("/api/user/profile", "forged")).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(upstream.hits(), 0);
    let body = body_json(response).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["trace_id"], "corr-e2e-1");
}

#[tokio::test]
async fn test_config_driven_route_authorization() {
    let upstream = MockUpstream::start_ok().await;
    let mut config = gateway_config(&[("tenant", &upstream.url())]);
    config
        .services
        .required_permissions
        .insert("tenant".to_string(), vec!["tenant.manage".to_string()]);

    // The sample record grants user.* only.
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(config.clone(), auth);

    let response = send(&app, authed_get("/api/tenant/list", "opaque-valid")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.hits(), 0);
    let body = body_json(response).await;
    assert_eq!(
        body["details"]["missing_permissions"],
        serde_json::json!(["tenant.manage"])
    );

    // A principal holding the permission passes through.
    let mut record = sample_record();
    record.permissions.push("tenant.manage".to_string());
    let auth = Arc::new(MockAuthApi::new("opaque-admin", record));
    let app = app_with(config, auth);

    let response = send(&app, authed_get("/api/tenant/list", "opaque-admin")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_auth_family_is_public_and_forwarded() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(gateway_config(&[("auth", &upstream.url())]), auth);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/login")
        .header("content-type", "application/json")
        .extension(ConnectInfo(client_addr()))
        .body(Body::from(r#"{"identifier":"user@example.com"}"#))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let seen = upstream.last_request().expect("auth upstream reached");
    assert_eq!(seen.method, Method::POST);
    assert_eq!(seen.path, "/auth/login");
}

#[tokio::test]
async fn test_upload_family_maps_to_file_service() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(
        gateway_config(&[("file-service", &upstream.url())]),
        auth,
    );

    let request = Request::builder()
        .method(Method::PUT)
        .uri("/upload/avatars/u-123.png")
        .header("content-type", "image/png")
        .header("authorization", "Bearer opaque-valid")
        .extension(ConnectInfo(client_addr()))
        .body(Body::from(vec![0u8; 16]))
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let seen = upstream.last_request().expect("file service reached");
    assert_eq!(seen.path, "/upload/avatars/u-123.png");
}

#[tokio::test]
async fn test_page_family_maps_to_ui_variant() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(gateway_config(&[("cms-ui", &upstream.url())]), auth);

    let request = Request::builder()
        .uri("/page/cms/home")
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(upstream.hits(), 1);
}

#[tokio::test]
async fn test_slug_fallback_reaches_system_default() {
    let upstream = MockUpstream::start_ok().await;
    let auth = Arc::new(MockAuthApi::new("opaque-valid", sample_record()));
    let app = app_with(
        gateway_config(&[("dashboard-service", &upstream.url())]),
        auth,
    );

    let request = Request::builder()
        .uri("/pricing")
        .extension(ConnectInfo(client_addr()))
        .body(Body::empty())
        .unwrap();
    let response = send(&app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let seen = upstream.last_request().expect("system default reached");
    assert_eq!(seen.path, "/pricing");
}
