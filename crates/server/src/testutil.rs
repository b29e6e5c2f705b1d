//! Shared fixtures for the server crate's unit tests.

use crate::state::AppState;
use async_trait::async_trait;
use portico_core::{
    auth::{AuthApi, AuthError, InternalTokenSigner, TokenVerifier, VerifiedToken},
    breaker::BreakerRegistry,
    cache::TieredCache,
    config::AppConfig,
    health::HealthRegistry,
    metrics::MetricsCollector,
    proxy::{Dispatcher, ForwardClient, ServiceResolver},
    ratelimit::RateLimiter,
};
use std::{collections::HashMap, sync::Arc, time::Duration};

/// Auth collaborator that accepts exactly one token.
pub(crate) struct StaticAuth {
    pub accepted: String,
    pub record: VerifiedToken,
}

impl StaticAuth {
    pub(crate) fn accepting(token: &str) -> Self {
        Self {
            accepted: token.to_string(),
            record: sample_record(),
        }
    }
}

#[async_trait]
impl AuthApi for StaticAuth {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        if token == self.accepted {
            Ok(self.record.clone())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

pub(crate) fn sample_record() -> VerifiedToken {
    VerifiedToken {
        valid: true,
        user_id: "u-1".to_string(),
        tenant_id: "t-1".to_string(),
        email: "user@example.com".to_string(),
        roles: vec!["user".to_string()],
        permissions: vec!["user.read".to_string(), "user.write".to_string()],
        metadata: HashMap::new(),
        expires_at: None,
    }
}

pub(crate) struct StateBuilder {
    config: AppConfig,
    rate_limiter: Arc<RateLimiter>,
    auth_api: Arc<dyn AuthApi>,
}

pub(crate) fn state_builder() -> StateBuilder {
    let mut config = AppConfig::default();
    config.auth.jwt_secret = "test-secret".to_string();
    StateBuilder {
        config,
        rate_limiter: Arc::new(RateLimiter::new(1000.0, 1000)),
        auth_api: Arc::new(StaticAuth::accepting("valid-token")),
    }
}

impl StateBuilder {
    pub(crate) fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub(crate) fn rate_limiter(mut self, rate_limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub(crate) fn auth(mut self, auth_api: Arc<dyn AuthApi>) -> Self {
        self.auth_api = auth_api;
        self
    }

    pub(crate) fn build(self) -> AppState {
        let config = Arc::new(self.config);
        let metrics = Arc::new(MetricsCollector::new());
        let cache = Arc::new(TieredCache::new(
            1024 * 1024,
            Duration::from_secs(300),
            None,
        ));
        let verifier = Arc::new(
            TokenVerifier::new(self.auth_api, cache).with_metrics(Arc::clone(&metrics)),
        );
        let signer = Arc::new(InternalTokenSigner::new(
            &config.auth.jwt_secret,
            Duration::from_secs(300),
        ));
        let resolver = Arc::new(ServiceResolver::new(config.services.targets.clone()));
        let client = ForwardClient::new(Duration::from_secs(1), 1, Duration::from_millis(10))
            .expect("test forward client");
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker_config(),
            config.breaker.enabled,
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            resolver,
            client,
            Arc::clone(&breakers),
            config.services.system_default.clone(),
            config.proxy.failover_status_threshold,
        ));

        AppState {
            config,
            metrics,
            rate_limiter: self.rate_limiter,
            verifier,
            signer,
            dispatcher,
            breakers,
            health: Arc::new(HealthRegistry::new()),
        }
    }
}
