//! Prometheus metrics collection behind a thin facade.
//!
//! The global recorder is process-wide; the facade isolates it so tests can
//! construct collectors freely — the first initialization installs the
//! recorder, later ones reuse the shared handle. Hot-path recording uses
//! lock-free counter/histogram operations only.

use crate::breaker::BreakerState;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::{
    borrow::Cow,
    sync::{Arc, OnceLock},
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

static UPSTREAM_NAME_POOL: OnceLock<dashmap::DashMap<String, &'static str>> = OnceLock::new();

/// Interns upstream names so per-request label construction does not
/// allocate. The set of logical upstream names is small and fixed by
/// configuration, so the leak is bounded.
#[inline]
fn upstream_to_static(upstream: &str) -> Cow<'static, str> {
    let pool = UPSTREAM_NAME_POOL.get_or_init(dashmap::DashMap::new);

    if let Some(interned) = pool.get(upstream) {
        return Cow::Borrowed(*interned);
    }

    let owned = upstream.to_string();
    let leaked: &'static str = Box::leak(owned.clone().into_boxed_str());
    pool.insert(owned, leaked);
    Cow::Borrowed(leaked)
}

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "failed to install primary Prometheus recorder, using fallback"
                );
                let recorder = PrometheusBuilder::new().build_recorder();
                recorder.handle()
            }
        })
        .clone()
}

/// Facade over the Prometheus recorder for all gateway series.
pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
}

impl MetricsCollector {
    /// Installs (or reuses) the process-wide Prometheus recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            prometheus_handle: init_prometheus_recorder(),
        }
    }

    /// Records one completed request keyed by method, route template, and status.
    pub fn record_http_request(&self, method: &str, route: &str, status: u16, duration_secs: f64) {
        counter!(
            "gateway_http_requests_total",
            "method" => method.to_string(),
            "route" => route.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        histogram!(
            "gateway_http_request_duration_seconds",
            "method" => method.to_string(),
            "route" => route.to_string()
        )
        .record(duration_secs);
    }

    /// Increments the in-flight request gauge.
    pub fn inc_active_requests(&self) {
        gauge!("gateway_http_requests_active").increment(1.0);
    }

    /// Decrements the in-flight request gauge.
    pub fn dec_active_requests(&self) {
        gauge!("gateway_http_requests_active").decrement(1.0);
    }

    /// Records a rate-limit admission decision.
    pub fn record_rate_limit(&self, allowed: bool) {
        if allowed {
            counter!("gateway_rate_limit_allowed_total").increment(1);
        } else {
            counter!("gateway_rate_limit_rejected_total").increment(1);
        }
    }

    /// Records buckets reclaimed by a sweeper pass.
    pub fn record_rate_limit_sweep(&self, removed: usize) {
        counter!("gateway_rate_limit_reclaimed_total").increment(removed as u64);
    }

    /// Publishes a breaker state transition: gauge {0=closed, 1=open,
    /// 2=half-open} tagged by upstream, plus a transition counter.
    pub fn record_breaker_state(&self, upstream: &str, state: BreakerState) {
        let upstream_cow = upstream_to_static(upstream);
        gauge!("gateway_circuit_breaker_state", "upstream" => upstream_cow.clone())
            .set(state.as_gauge_value());
        counter!(
            "gateway_circuit_breaker_transitions_total",
            "upstream" => upstream_cow,
            "to_state" => state.as_metric_str()
        )
        .increment(1);
    }

    /// Records one outbound upstream call.
    pub fn record_upstream_request(&self, upstream: &str, success: bool, duration_secs: f64) {
        let upstream_cow = upstream_to_static(upstream);
        let outcome = if success { "success" } else { "error" };
        counter!(
            "gateway_upstream_requests_total",
            "upstream" => upstream_cow.clone(),
            "outcome" => outcome
        )
        .increment(1);
        histogram!(
            "gateway_upstream_request_duration_seconds",
            "upstream" => upstream_cow
        )
        .record(duration_secs);
    }

    /// Records a retry of an idempotent upstream call.
    pub fn record_upstream_retry(&self, upstream: &str) {
        counter!(
            "gateway_upstream_retries_total",
            "upstream" => upstream_to_static(upstream)
        )
        .increment(1);
    }

    /// Records one hop of the failover chain.
    pub fn record_failover(&self, from: &str, to: &str) {
        counter!(
            "gateway_failovers_total",
            "from" => upstream_to_static(from),
            "to" => upstream_to_static(to)
        )
        .increment(1);
    }

    /// Records a verified-token cache lookup.
    pub fn record_token_cache(&self, hit: bool) {
        if hit {
            counter!("gateway_token_cache_hits_total").increment(1);
        } else {
            counter!("gateway_token_cache_misses_total").increment(1);
        }
    }

    /// Records an authentication attempt outcome.
    pub fn record_auth_attempt(&self, success: bool) {
        if success {
            counter!("gateway_auth_success_total").increment(1);
        } else {
            counter!("gateway_auth_failure_total").increment(1);
        }
    }

    /// Records a dependency health observation from the aggregator.
    pub fn record_dependency_health(&self, dependency: &str, healthy: bool) {
        gauge!(
            "gateway_dependency_health",
            "dependency" => dependency.to_string()
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }

    /// Renders the Prometheus text exposition.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus_handle.render()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Initializes the shared metrics collector.
#[must_use]
pub fn init_metrics() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new())
}
