//! Per-request context carried through the middleware pipeline.

use chrono::{DateTime, Utc};
use std::{collections::HashMap, sync::Arc, time::Instant};
use uuid::Uuid;

/// A unique identifier for a request, used for end-to-end correlation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId(pub Arc<str>);

impl CorrelationId {
    /// Creates a correlation id from a string supplied by the client.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random correlation id (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Returns the correlation id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The authenticated caller, bound to the context after token verification.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    pub email: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
    /// Logical service the caller's tenant falls back to for slug routes
    /// and failover. Consumed at most once per request.
    pub default_service: Option<String>,
}

/// Immutable-after-binding record attached to each in-flight request.
///
/// The correlation id and receive time are bound by the correlation-id
/// stage; the deadline by the deadline stage; the principal by the
/// authentication stage. Later stages observe annotations from earlier
/// ones — the pipeline order guarantees it.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub received_at: DateTime<Utc>,
    pub deadline: Option<Instant>,
    pub principal: Option<Principal>,
    /// Free-form annotations for the structured access log.
    pub tags: HashMap<String, String>,
}

impl RequestContext {
    /// Creates a context bound to the given correlation id at the current time.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            received_at: Utc::now(),
            deadline: None,
            principal: None,
            tags: HashMap::new(),
        }
    }

    /// Remaining time until the request deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }
}
