//! Reverse-proxy dispatch with service resolution and failover.
//!
//! The dispatcher resolves a logical service name, forwards the request
//! byte-for-byte under circuit-breaker protection, and on upstream failure
//! walks the failover chain: the caller's tenant default service (consumed
//! exactly once), the configured system default, and finally a redirect to
//! the login page.

mod client;
mod errors;
mod resolver;

pub use client::ForwardClient;
pub use errors::ProxyError;
pub use resolver::{ServiceResolver, ServiceTarget};

use crate::{breaker::BreakerRegistry, metrics::MetricsCollector};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::{sync::Arc, time::Instant};

/// Headers that belong to one hop and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// One request as seen by the dispatcher.
///
/// `headers` already carry the gateway-injected `X-Correlation-ID`,
/// `X-Tenant-ID`, and `X-Internal-Token`; the dispatcher forwards them and
/// rewrites only transport concerns.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Logical name of the primary upstream.
    pub service: String,
    pub method: Method,
    /// Original request-line path and query, forwarded byte-for-byte.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<String>,
    pub deadline: Option<Instant>,
    /// The caller's tenant default service, consumed at most once by the
    /// failover chain.
    pub tenant_default: Option<String>,
}

/// Result of a dispatch: an upstream response to stream back, or a
/// redirect when the failover chain is exhausted.
pub enum DispatchOutcome {
    Upstream(reqwest::Response),
    Redirect(String),
}

/// Dynamic reverse-proxy dispatcher.
pub struct Dispatcher {
    resolver: Arc<ServiceResolver>,
    client: ForwardClient,
    breakers: Arc<BreakerRegistry>,
    system_default: String,
    failover_status_threshold: u16,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        resolver: Arc<ServiceResolver>,
        client: ForwardClient,
        breakers: Arc<BreakerRegistry>,
        system_default: String,
        failover_status_threshold: u16,
    ) -> Self {
        Self {
            resolver,
            client,
            breakers,
            system_default,
            failover_status_threshold,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Dispatches with the full failover chain.
    ///
    /// The chain is: primary service, then the tenant default (cleared on
    /// use so it is attempted at most once), then the system default; no
    /// candidate is dispatched twice. When the chain is exhausted the
    /// outcome is a `302` redirect to `/auth/login` carrying the last
    /// failure reason.
    ///
    /// # Errors
    ///
    /// Non-failover errors (unreadable body, expired deadline, internal
    /// bugs) are returned directly.
    pub async fn dispatch(&self, mut request: DispatchRequest) -> Result<DispatchOutcome, ProxyError> {
        let mut tenant_default = request.tenant_default.take();
        let mut tried: Vec<String> = Vec::new();
        let mut current = request.service.clone();
        let mut last_error;

        loop {
            match self.try_dispatch(&current, &request).await {
                Ok(response) => return Ok(DispatchOutcome::Upstream(response)),
                Err(e) if e.triggers_failover() => {
                    tracing::warn!(
                        service = %current,
                        error = %e,
                        "upstream dispatch failed, consulting failover chain"
                    );
                    last_error = e;
                }
                Err(e) => return Err(e),
            }
            tried.push(current.clone());

            // Tenant default is consumed here even when already tried, so a
            // later hop can never loop back through it.
            let next = [tenant_default.take(), Some(self.system_default.clone())]
                .into_iter()
                .flatten()
                .find(|candidate| !tried.contains(candidate));

            match next {
                Some(candidate) => {
                    tracing::info!(from = %current, to = %candidate, "failing over");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_failover(&current, &candidate);
                    }
                    current = candidate;
                }
                None => {
                    return Ok(DispatchOutcome::Redirect(login_redirect(
                        &last_error.to_string(),
                    )));
                }
            }
        }
    }

    /// Dispatches to a single service with no failover. Used for the
    /// public `/auth/*` family, whose own failure must not redirect back
    /// into itself.
    ///
    /// # Errors
    ///
    /// All dispatch failures surface to the caller.
    pub async fn dispatch_direct(
        &self,
        service: &str,
        request: &DispatchRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        self.try_dispatch(service, request).await
    }

    async fn try_dispatch(
        &self,
        service: &str,
        request: &DispatchRequest,
    ) -> Result<reqwest::Response, ProxyError> {
        let base = match self.resolver.resolve(service) {
            Some(ServiceTarget::Http(base)) => base,
            Some(ServiceTarget::Grpc(_)) => {
                // The byte-stream dispatcher cannot transcode into gRPC
                // framing; typed clients own those targets.
                tracing::debug!(service, "resolved to a gRPC target, not dispatchable");
                return Err(ProxyError::UnresolvedService(service.to_string()));
            }
            None => return Err(ProxyError::UnresolvedService(service.to_string())),
        };

        let url = format!("{base}{}", request.path_and_query);
        let headers = upstream_headers(&request.headers, request.client_ip.as_deref());
        let threshold = self.failover_status_threshold;

        let response = self
            .breakers
            .execute(service, request.deadline, || async {
                let response = self
                    .client
                    .forward(
                        service,
                        request.method.clone(),
                        &url,
                        headers,
                        request.body.clone(),
                        request.deadline,
                    )
                    .await?;

                let status = response.status().as_u16();
                if status >= threshold {
                    return Err(ProxyError::UpstreamStatus(status));
                }
                Ok(response)
            })
            .await
            .map_err(ProxyError::from)?;

        Ok(response)
    }
}

/// Builds the header set forwarded upstream: hop-by-hop headers stripped,
/// `Host` dropped for rewrite, client IP appended to `X-Forwarded-For`.
fn upstream_headers(headers: &HeaderMap, client_ip: Option<&str>) -> HeaderMap {
    let mut forwarded = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP_HEADERS.contains(&name.as_str()) || name == &http::header::CONTENT_LENGTH {
            continue;
        }
        forwarded.append(name.clone(), value.clone());
    }

    if let Some(ip) = client_ip {
        let xff = HeaderName::from_static("x-forwarded-for");
        let appended = match forwarded.get(&xff).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&appended) {
            forwarded.insert(xff, value);
        }
    }
    forwarded
}

fn login_redirect(reason: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("error", reason)
        .finish();
    format!("/auth/login?{query}")
}
