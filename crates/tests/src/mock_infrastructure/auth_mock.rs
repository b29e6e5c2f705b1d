//! Mock auth collaborator with call counting.

use async_trait::async_trait;
use portico_core::auth::{AuthApi, AuthError, VerifiedToken};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Accepts a single configured token and counts verification calls.
pub struct MockAuthApi {
    accepted: String,
    record: VerifiedToken,
    calls: AtomicUsize,
}

impl MockAuthApi {
    #[must_use]
    pub fn new(accepted: &str, record: VerifiedToken) -> Self {
        Self {
            accepted: accepted.to_string(),
            record,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times the collaborator was consulted.
    #[must_use]
    pub fn verify_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthApi for MockAuthApi {
    async fn verify_token(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if token == self.accepted {
            Ok(self.record.clone())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}
