//! The single error envelope returned for every gateway-originated failure.
//!
//! Upstream-originated bodies are forwarded unmodified; everything the
//! gateway itself produces uses [`ErrorResponse`] so clients can branch on
//! the stable machine `code` instead of parsing prose.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable machine codes for gateway-originated errors.
///
/// The code string is part of the external contract: clients and alerting
/// rules match on it, so variants are never renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Request rejected by validation or the body size limit.
    InvalidRequest,
    /// Missing, malformed, or unverifiable bearer token.
    Unauthorized,
    /// Authenticated but lacking a required permission or role.
    Forbidden,
    /// Token bucket for the caller's key is exhausted.
    RateLimited,
    /// The per-request deadline fired before a response was produced.
    Timeout,
    /// Upstream unreachable: dial failure, unresolved service, or open breaker.
    UpstreamUnavailable,
    /// Upstream answered with a server error the gateway did not forward.
    UpstreamError,
    /// Recovery from an unhandled failure inside the pipeline.
    Internal,
}

impl ErrorKind {
    /// Returns the stable machine token for this kind.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::Internal => "INTERNAL_ERROR",
        }
    }

    /// Returns the HTTP status the kind maps to by default.
    #[must_use]
    pub fn default_status(&self) -> u16 {
        match self {
            Self::InvalidRequest => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::RateLimited => 429,
            Self::Timeout => 504,
            Self::UpstreamUnavailable => 503,
            Self::UpstreamError => 502,
            Self::Internal => 500,
        }
    }
}

/// Standardized error response body.
///
/// `timestamp` is RFC3339 UTC, assigned at construction time. `details` and
/// `trace_id` are omitted from the wire format when absent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    pub timestamp: String,
}

impl ErrorResponse {
    /// Creates an envelope for the given kind, stamping the current UTC time.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            code: kind.code().to_string(),
            message: message.into(),
            details: None,
            trace_id: None,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        }
    }

    /// Attaches free-form machine-readable details.
    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attaches the request correlation id.
    #[must_use]
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }
}
