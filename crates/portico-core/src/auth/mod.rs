//! Opaque-token verification, verified-token caching, and internal token
//! minting.
//!
//! The gateway never interprets client bearer tokens itself: they are
//! verified by the auth collaborator, and the result is cached in the
//! tiered cache under `token:<opaque>` for at most the token's remaining
//! lifetime (capped at 30 minutes). After verification the gateway mints a
//! short-lived signed internal token so upstreams need not re-verify.

mod client;
pub mod permissions;

pub use client::HttpAuthClient;

use crate::{
    cache::{CacheError, TieredCache},
    metrics::MetricsCollector,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc, time::Duration};
use thiserror::Error;

/// Verified-token cache TTL ceiling.
const MAX_TOKEN_CACHE_TTL: Duration = Duration::from_secs(30 * 60);

/// Authentication and token errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The collaborator rejected the token.
    #[error("invalid or expired token")]
    InvalidToken,

    /// The collaborator could not be reached.
    #[error("auth service unavailable: {0}")]
    Unavailable(String),

    /// The collaborator answered with an unexpected error.
    #[error("auth service error: {0}")]
    Service(String),

    /// The internal token could not be minted.
    #[error("token signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// The collaborator's verdict on an opaque bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifiedToken {
    pub valid: bool,
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Absolute expiry of the opaque token, when the collaborator reports one.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl VerifiedToken {
    /// The tenant's default service for slug routing and failover, if the
    /// collaborator annotated one.
    #[must_use]
    pub fn default_service(&self) -> Option<&str> {
        self.metadata.get("default_service").map(String::as_str)
    }
}

/// Narrow contract consumed from the auth collaborator.
#[async_trait]
pub trait AuthApi: Send + Sync {
    /// Verifies an opaque bearer token, returning the full record.
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError>;
}

/// Caching token verifier (C3-backed).
pub struct TokenVerifier {
    api: Arc<dyn AuthApi>,
    cache: Arc<TieredCache>,
    max_ttl: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, cache: Arc<TieredCache>) -> Self {
        Self {
            api,
            cache,
            max_ttl: MAX_TOKEN_CACHE_TTL,
            metrics: None,
        }
    }

    /// Caps the verified-token cache TTL below the 30-minute default.
    #[must_use]
    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl.min(MAX_TOKEN_CACHE_TTL);
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Verifies `token`, serving from the cache when possible.
    ///
    /// A cache miss always consults the collaborator; its failure
    /// propagates rather than being papered over. Only valid records are
    /// cached, with TTL bounded by the token's remaining lifetime.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidToken`] for rejected tokens, transport and
    /// collaborator errors otherwise.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let key = cache_key(token);

        match self.cache.get_json::<VerifiedToken>(&key).await {
            Ok(Some(record)) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_token_cache(true);
                }
                return Ok(record);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::debug!(error = %e, "token cache read failed, falling through to auth service");
            }
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_token_cache(false);
        }

        let record = self.api.verify_token(token).await?;
        if !record.valid {
            return Err(AuthError::InvalidToken);
        }

        let ttl = self.cache_ttl(&record);
        if ttl > Duration::ZERO {
            if let Err(e) = self.cache.set_json(&key, &record, ttl).await {
                tracing::warn!(error = %e, "failed to cache verified token");
            }
        }
        Ok(record)
    }

    /// Drops the cached record for `token`.
    ///
    /// # Errors
    ///
    /// Propagates L2 delete failures.
    pub async fn invalidate(&self, token: &str) -> Result<(), AuthError> {
        self.cache.delete(&cache_key(token)).await?;
        Ok(())
    }

    fn cache_ttl(&self, record: &VerifiedToken) -> Duration {
        match record.expires_at {
            Some(expires_at) => {
                let remaining = expires_at - Utc::now();
                match remaining.to_std() {
                    Ok(remaining) => remaining.min(self.max_ttl),
                    Err(_) => Duration::ZERO,
                }
            }
            None => self.max_ttl,
        }
    }
}

fn cache_key(token: &str) -> String {
    format!("token:{token}")
}

/// Claims carried by the internal signed token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InternalClaims {
    pub sub: String,
    pub tenant_id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints the short-lived internal token forwarded to upstreams.
pub struct InternalTokenSigner {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: Duration,
    issuer: String,
}

impl InternalTokenSigner {
    #[must_use]
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
            issuer: "portico".to_string(),
        }
    }

    /// Signs an internal token over the verified principal.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] when encoding fails.
    pub fn mint(&self, record: &VerifiedToken) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = InternalClaims {
            sub: record.user_id.clone(),
            tenant_id: record.tenant_id.clone(),
            email: record.email.clone(),
            roles: record.roles.clone(),
            permissions: record.permissions.clone(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + i64::try_from(self.ttl.as_secs()).unwrap_or(300),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))
    }

    /// Decodes and validates an internal token. Used by tests and by
    /// upstream-side verification.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for any signature or claim failure.
    pub fn decode(&self, token: &str) -> Result<InternalClaims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        decode::<InternalClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}
