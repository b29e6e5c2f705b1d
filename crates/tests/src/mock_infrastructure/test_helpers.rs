//! Helpers for assembling the full gateway in-process.

use portico_core::{
    auth::{AuthApi, InternalTokenSigner, TokenVerifier, VerifiedToken},
    breaker::BreakerRegistry,
    cache::TieredCache,
    config::AppConfig,
    health::HealthRegistry,
    metrics::MetricsCollector,
    proxy::{Dispatcher, ForwardClient, ServiceResolver},
    ratelimit::RateLimiter,
};
use server::AppState;
use std::{collections::HashMap, sync::Arc, time::Duration};

pub const TEST_JWT_SECRET: &str = "integration-test-secret";

/// A gateway configuration pointing the named logical services at the
/// given base URLs, with generous rate limits and fast breaker timings.
#[must_use]
pub fn gateway_config(targets: &[(&str, &str)]) -> AppConfig {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = TEST_JWT_SECRET.to_string();
    config.rate_limit.rps = 10_000.0;
    config.rate_limit.burst = 10_000;
    config.services.targets = targets
        .iter()
        .map(|(name, url)| ((*name).to_string(), (*url).to_string()))
        .collect();
    // Keep retries out of the way unless a test opts in.
    config.proxy.retry_max_attempts = 1;
    config.proxy.dial_timeout_seconds = 1;
    config
}

/// The verified-token record used across the suite.
#[must_use]
pub fn sample_record() -> VerifiedToken {
    VerifiedToken {
        valid: true,
        user_id: "user-123".to_string(),
        tenant_id: "tenant-456".to_string(),
        email: "user@example.com".to_string(),
        roles: vec!["user".to_string()],
        permissions: vec!["user.read".to_string(), "user.write".to_string()],
        metadata: HashMap::new(),
        expires_at: None,
    }
}

/// Builds the full application state over a mock auth collaborator.
#[must_use]
pub fn build_state(config: AppConfig, auth: Arc<dyn AuthApi>) -> AppState {
    let config = Arc::new(config);
    let metrics = Arc::new(MetricsCollector::new());
    let cache = Arc::new(TieredCache::new(
        16 * 1024 * 1024,
        Duration::from_secs(300),
        None,
    ));
    let verifier =
        Arc::new(TokenVerifier::new(auth, cache).with_metrics(Arc::clone(&metrics)));
    let signer = Arc::new(InternalTokenSigner::new(
        &config.auth.jwt_secret,
        Duration::from_secs(config.auth.internal_token_ttl_seconds),
    ));
    let breakers = Arc::new(
        BreakerRegistry::new(config.breaker_config(), config.breaker.enabled)
            .with_metrics(Arc::clone(&metrics)),
    );
    let resolver = Arc::new(ServiceResolver::new(config.services.targets.clone()));
    let client = ForwardClient::new(
        Duration::from_secs(config.proxy.dial_timeout_seconds),
        config.proxy.retry_max_attempts,
        Duration::from_millis(config.proxy.retry_base_delay_ms),
    )
    .expect("forward client builds")
    .with_metrics(Arc::clone(&metrics));
    let dispatcher = Arc::new(
        Dispatcher::new(
            resolver,
            client,
            Arc::clone(&breakers),
            config.services.system_default.clone(),
            config.proxy.failover_status_threshold,
        )
        .with_metrics(Arc::clone(&metrics)),
    );

    let rate_limiter = Arc::new(RateLimiter::new(
        config.rate_limit.rps,
        config.rate_limit.burst,
    ));

    AppState {
        config,
        metrics,
        rate_limiter,
        verifier,
        signer,
        dispatcher,
        breakers,
        health: Arc::new(HealthRegistry::new()),
    }
}

/// Sends one request through a clone of the app.
pub async fn send(
    app: &axum::Router,
    request: axum::http::Request<axum::body::Body>,
) -> axum::response::Response {
    use tower::ServiceExt;
    app.clone().oneshot(request).await.expect("infallible")
}
