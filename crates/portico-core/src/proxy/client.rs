//! Outbound HTTP client with bounded retries.

use super::errors::ProxyError;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http::{HeaderMap, Method};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

/// HTTP client for forwarding requests to upstreams.
///
/// Retries at most `retry_max_attempts` times with exponential backoff
/// starting at `retry_base_delay`, and only for idempotent methods on
/// transport-level errors. Body-bearing non-idempotent calls are never
/// retried.
pub struct ForwardClient {
    client: reqwest::Client,
    retry_max_attempts: u32,
    retry_base_delay: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ForwardClient {
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] when the underlying client cannot
    /// be built.
    pub fn new(
        dial_timeout: Duration,
        retry_max_attempts: u32,
        retry_base_delay: Duration,
    ) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(dial_timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build forwarding client");
                ProxyError::Internal(format!("forwarding client build failed: {e}"))
            })?;
        Ok(Self {
            client,
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay,
            metrics: None,
        })
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sends one request to `url`, honoring the caller's deadline.
    ///
    /// The response is returned unread so the body can be streamed back to
    /// the client.
    ///
    /// # Errors
    ///
    /// - [`ProxyError::DeadlineExceeded`] when no budget remains
    /// - [`ProxyError::Timeout`] / [`ProxyError::Connect`] after retries
    ///   are exhausted
    pub async fn forward(
        &self,
        upstream: &str,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Bytes,
        deadline: Option<Instant>,
    ) -> Result<reqwest::Response, ProxyError> {
        let retryable_method = is_idempotent(&method);
        let mut attempt = 1u32;

        loop {
            let remaining = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(ProxyError::DeadlineExceeded);
                    }
                    Some(remaining)
                }
                None => None,
            };

            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(headers.clone())
                .body(body.clone());
            if let Some(remaining) = remaining {
                request = request.timeout(remaining);
            }

            let started = Instant::now();
            match request.send().await {
                Ok(response) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_upstream_request(
                            upstream,
                            !response.status().is_server_error(),
                            started.elapsed().as_secs_f64(),
                        );
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let error = classify(&e);
                    if let Some(metrics) = &self.metrics {
                        metrics.record_upstream_request(
                            upstream,
                            false,
                            started.elapsed().as_secs_f64(),
                        );
                    }

                    let can_retry = retryable_method
                        && error.is_transient()
                        && attempt < self.retry_max_attempts;
                    if !can_retry {
                        return Err(error);
                    }

                    let delay = self.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    tracing::debug!(
                        upstream,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying idempotent upstream call"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_upstream_retry(upstream);
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Only these methods are safe to replay against an upstream.
fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::PUT | Method::DELETE
    )
}

fn classify(error: &reqwest::Error) -> ProxyError {
    if error.is_timeout() {
        ProxyError::Timeout
    } else {
        ProxyError::Connect(sanitize_network_error(error))
    }
}

/// Strips connection details from network errors so upstream addresses and
/// internals never leak into client-visible messages.
fn sanitize_network_error(error: &reqwest::Error) -> String {
    if error.is_connect() {
        "connection refused or unreachable".to_string()
    } else if error.is_request() {
        "request failed".to_string()
    } else if error.is_body() {
        "response body error".to_string()
    } else if error.is_redirect() {
        "too many redirects".to_string()
    } else {
        "network error".to_string()
    }
}
