//! Shared application state wired by the lifecycle manager.

use portico_core::{
    auth::{InternalTokenSigner, TokenVerifier},
    breaker::BreakerRegistry,
    config::AppConfig,
    health::HealthRegistry,
    metrics::MetricsCollector,
    proxy::Dispatcher,
    ratelimit::RateLimiter,
};
use std::sync::Arc;

/// Handles to every runtime component, cloned into each middleware stage
/// and handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<MetricsCollector>,
    pub rate_limiter: Arc<RateLimiter>,
    pub verifier: Arc<TokenVerifier>,
    pub signer: Arc<InternalTokenSigner>,
    pub dispatcher: Arc<Dispatcher>,
    pub breakers: Arc<BreakerRegistry>,
    pub health: Arc<HealthRegistry>,
}
