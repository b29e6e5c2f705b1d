//! Admission boundaries through the full application.

use crate::mock_infrastructure::{build_state, gateway_config, sample_record, send, MockAuthApi};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{Request, StatusCode},
    Router,
};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::Arc,
};

fn app(rps: f64, burst: u32) -> Router {
    let mut config = gateway_config(&[]);
    config.rate_limit.rps = rps;
    config.rate_limit.burst = burst;
    let auth = Arc::new(MockAuthApi::new("valid-token", sample_record()));
    server::build_router(build_state(config, auth))
}

fn request(ip: [u8; 4], tenant: Option<&str>) -> Request<Body> {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::from(ip)), 50000);
    let mut builder = Request::builder()
        .uri("/ready")
        .extension(ConnectInfo(addr));
    if let Some(tenant) = tenant {
        builder = builder.header("x-tenant-id", tenant);
    }
    builder.body(Body::empty()).expect("request builds")
}

#[tokio::test]
async fn test_burst_is_fully_admitted_and_next_is_rejected() {
    let app = app(0.001, 3);

    for i in 0..3 {
        let response = send(&app, request([10, 0, 0, 1], None)).await;
        assert_eq!(response.status(), StatusCode::OK, "request {i} rejected");
    }

    let response = send(&app, request([10, 0, 0, 1], None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), br#"{"error":"Rate limit exceeded"}"#);
}

#[tokio::test]
async fn test_tenant_header_composes_the_key() {
    let app = app(0.001, 1);

    // Same IP, two tenants: independent buckets.
    assert_eq!(
        send(&app, request([10, 0, 0, 2], Some("tenant-a")))
            .await
            .status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, request([10, 0, 0, 2], Some("tenant-b")))
            .await
            .status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, request([10, 0, 0, 2], Some("tenant-a")))
            .await
            .status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_distinct_ips_do_not_share_buckets() {
    let app = app(0.001, 1);

    assert_eq!(
        send(&app, request([10, 0, 1, 1], None)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, request([10, 0, 1, 2], None)).await.status(),
        StatusCode::OK
    );
    assert_eq!(
        send(&app, request([10, 0, 1, 1], None)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
