//! Dispatch error taxonomy.

use crate::breaker::BreakerError;
use thiserror::Error;

/// Errors that can occur while dispatching to an upstream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProxyError {
    /// The logical service name has no configured or discoverable target.
    #[error("service '{0}' could not be resolved")]
    UnresolvedService(String),

    /// Failed to establish a connection to the upstream.
    #[error("upstream connection failed: {0}")]
    Connect(String),

    /// The upstream did not answer within the attempt timeout.
    #[error("upstream request timed out")]
    Timeout,

    /// The upstream answered with a status at or above the failover
    /// threshold.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    /// The circuit breaker is open; the call was not issued.
    #[error("circuit breaker is open")]
    BreakerOpen,

    /// The request deadline expired before or during dispatch.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// The request body could not be read (typically a size-limit overrun).
    #[error("request body could not be read: {0}")]
    Body(String),

    /// Unexpected internal failure.
    #[error("gateway error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Returns `true` when the failover chain should be consulted.
    ///
    /// Client-side problems (unreadable body, expired deadline) and
    /// internal bugs are surfaced directly instead.
    #[must_use]
    pub fn triggers_failover(&self) -> bool {
        matches!(
            self,
            Self::UnresolvedService(_)
                | Self::Connect(_)
                | Self::Timeout
                | Self::UpstreamStatus(_)
                | Self::BreakerOpen
        )
    }

    /// Returns `true` for transport-level failures that may be retried on
    /// the same upstream (idempotent methods only).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Timeout)
    }
}

impl From<BreakerError<ProxyError>> for ProxyError {
    fn from(err: BreakerError<ProxyError>) -> Self {
        match err {
            BreakerError::Open => Self::BreakerOpen,
            BreakerError::Canceled => Self::DeadlineExceeded,
            BreakerError::Service(inner) => inner,
        }
    }
}
