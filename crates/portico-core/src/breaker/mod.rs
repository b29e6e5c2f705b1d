//! Per-upstream circuit breakers with a three-state machine.
//!
//! All mutable state for one breaker lives under a single lock so state
//! transitions are atomic. Breakers are created lazily per logical upstream
//! name and retained for the process lifetime; while a breaker is open no
//! upstream call is issued, and half-open admits a bounded number of
//! concurrent probes.

use crate::metrics::MetricsCollector;
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock as StdRwLock},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::sync::RwLock;

/// Circuit breaker state machine.
///
/// - `Closed` -> `Open`: when the trip predicate holds over the counter window
/// - `Open` -> `HalfOpen`: when the cooldown expires
/// - `HalfOpen` -> `Closed`: on a successful probe
/// - `HalfOpen` -> `Open`: on the first failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests are allowed through.
    Closed,
    /// Failure predicate tripped, requests fail fast.
    Open,
    /// Recovery mode, a bounded number of probes may proceed.
    HalfOpen,
}

impl BreakerState {
    /// Static label for metrics and logs.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding: 0 = closed, 1 = open, 2 = half-open.
    #[must_use]
    pub fn as_gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Open => 1.0,
            Self::HalfOpen => 2.0,
        }
    }
}

/// Tunables for one breaker. The defaults match the gateway contract:
/// trip when `requests >= 3` and the failure ratio reaches 0.6 within a
/// 60-second window, cool down for 30 seconds, then admit up to 3 probes.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Counter window while closed. Counters reset at each window boundary.
    pub interval: Duration,
    /// Time spent open before probing is allowed.
    pub cooldown: Duration,
    /// Maximum concurrent probes while half-open.
    pub max_probes: u32,
    /// Minimum observed requests before the ratio predicate may trip.
    pub min_requests: u32,
    /// Failure ratio at or above which the breaker trips.
    pub failure_ratio: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
            max_probes: 3,
            min_requests: 3,
            failure_ratio: 0.6,
        }
    }
}

/// Request counters tallied over the closed-state window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub successes: u32,
    pub failures: u32,
    pub consecutive_failures: u32,
}

/// Rejection or pass-through failure from a breaker-guarded call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// The breaker is open (or half-open probe capacity is exhausted);
    /// the call was not issued.
    #[error("circuit breaker is open")]
    Open,
    /// The caller's deadline had already passed before dispatch.
    #[error("request canceled before dispatch")]
    Canceled,
    /// The guarded call itself failed.
    #[error("{0}")]
    Service(E),
}

impl<E> BreakerError<E> {
    /// Returns `true` when the call was rejected without being issued.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Open | Self::Canceled)
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    counts: Counts,
    opened_at: Option<Instant>,
    interval_start: Instant,
    probes_inflight: u32,
}

struct Permit {
    probe: bool,
}

/// Circuit breaker for a single logical upstream.
pub struct CircuitBreaker {
    name: Arc<str>,
    config: BreakerConfig,
    inner: RwLock<BreakerInner>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: impl Into<Arc<str>>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                counts: Counts::default(),
                opened_at: None,
                interval_start: Instant::now(),
                probes_inflight: 0,
            }),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `f` under breaker protection.
    ///
    /// # Errors
    ///
    /// - [`BreakerError::Open`] while open, or while half-open with all
    ///   probe slots taken; `f` is not invoked.
    /// - [`BreakerError::Service`] carrying the failure from `f`.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().await?;
        let result = f().await;
        self.settle(permit, result.is_ok()).await;
        result.map_err(BreakerError::Service)
    }

    /// Like [`execute`](Self::execute), but short-circuits with
    /// [`BreakerError::Canceled`] when `deadline` has already passed.
    pub async fn execute_with_deadline<F, Fut, T, E>(
        &self,
        deadline: Option<Instant>,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                return Err(BreakerError::Canceled);
            }
        }
        self.execute(f).await
    }

    async fn acquire<E>(&self) -> Result<Permit, BreakerError<E>> {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::Closed => {
                if inner.interval_start.elapsed() >= self.config.interval {
                    inner.counts = Counts::default();
                    inner.interval_start = Instant::now();
                }
                inner.counts.requests += 1;
                Ok(Permit { probe: false })
            }
            BreakerState::Open => {
                let cooled_down = inner
                    .opened_at
                    .is_some_and(|t| t.elapsed() >= self.config.cooldown);
                if !cooled_down {
                    return Err(BreakerError::Open);
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.probes_inflight = 1;
                inner.counts.requests += 1;
                Ok(Permit { probe: true })
            }
            BreakerState::HalfOpen => {
                if inner.probes_inflight >= self.config.max_probes {
                    return Err(BreakerError::Open);
                }
                inner.probes_inflight += 1;
                inner.counts.requests += 1;
                Ok(Permit { probe: true })
            }
        }
    }

    async fn settle(&self, permit: Permit, success: bool) {
        let mut inner = self.inner.write().await;
        if permit.probe {
            inner.probes_inflight = inner.probes_inflight.saturating_sub(1);
        }

        if success {
            inner.counts.successes += 1;
            inner.counts.consecutive_failures = 0;
            if inner.state == BreakerState::HalfOpen {
                self.transition(&mut inner, BreakerState::Closed);
                inner.counts = Counts::default();
                inner.interval_start = Instant::now();
                inner.opened_at = None;
                inner.probes_inflight = 0;
            }
            return;
        }

        inner.counts.failures += 1;
        inner.counts.consecutive_failures += 1;
        match inner.state {
            BreakerState::Closed => {
                let counts = inner.counts;
                let ratio = f64::from(counts.failures) / f64::from(counts.requests.max(1));
                if counts.requests >= self.config.min_requests
                    && ratio >= self.config.failure_ratio
                {
                    self.trip(&mut inner);
                }
            }
            // The first failed probe reopens immediately.
            BreakerState::HalfOpen => self.trip(&mut inner),
            BreakerState::Open => {}
        }
    }

    fn trip(&self, inner: &mut BreakerInner) {
        self.transition(inner, BreakerState::Open);
        inner.opened_at = Some(Instant::now());
        inner.counts = Counts::default();
        inner.probes_inflight = 0;
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        let from = inner.state;
        inner.state = to;
        match to {
            BreakerState::Open => tracing::warn!(
                upstream = %self.name,
                from = from.as_metric_str(),
                "circuit breaker opened"
            ),
            BreakerState::HalfOpen => tracing::warn!(
                upstream = %self.name,
                "circuit breaker half-open, probing upstream"
            ),
            BreakerState::Closed => tracing::info!(
                upstream = %self.name,
                "circuit breaker closed after successful probe"
            ),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_breaker_state(&self.name, to);
        }
    }

    /// Returns the current state, resolving an expired cooldown lazily.
    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Returns a snapshot of the current counters.
    pub async fn counts(&self) -> Counts {
        self.inner.read().await.counts
    }
}

/// Registry of breakers keyed by logical upstream name.
///
/// Breakers are created lazily under a lock with a double-checked lookup
/// and retained for the process lifetime. When disabled, `execute` passes
/// calls straight through.
pub struct BreakerRegistry {
    breakers: StdRwLock<HashMap<String, Arc<CircuitBreaker>>>,
    config: BreakerConfig,
    metrics: Option<Arc<MetricsCollector>>,
    enabled: bool,
}

impl BreakerRegistry {
    #[must_use]
    pub fn new(config: BreakerConfig, enabled: bool) -> Self {
        Self {
            breakers: StdRwLock::new(HashMap::new()),
            config,
            metrics: None,
            enabled,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Returns the breaker for `name`, creating it on first reference.
    #[must_use]
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        {
            let map = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(breaker) = map.get(name) {
                return Arc::clone(breaker);
            }
        }

        let mut map = self.breakers.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check after acquiring the write lock.
        if let Some(breaker) = map.get(name) {
            return Arc::clone(breaker);
        }
        let mut breaker = CircuitBreaker::new(name.to_string(), self.config.clone());
        if let Some(metrics) = &self.metrics {
            breaker = breaker.with_metrics(Arc::clone(metrics));
        }
        let breaker = Arc::new(breaker);
        map.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    /// Runs `f` under the breaker for `name`, honoring the caller's deadline.
    ///
    /// # Errors
    ///
    /// See [`CircuitBreaker::execute_with_deadline`]. With breakers disabled
    /// the call is issued unguarded and only `Service` errors are returned.
    pub async fn execute<F, Fut, T, E>(
        &self,
        name: &str,
        deadline: Option<Instant>,
        f: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        if !self.enabled {
            return f().await.map_err(BreakerError::Service);
        }
        self.breaker(name).execute_with_deadline(deadline, f).await
    }

    /// Current state of the named breaker, if it has been created.
    pub async fn state_of(&self, name: &str) -> Option<BreakerState> {
        let breaker = {
            let map = self.breakers.read().unwrap_or_else(PoisonError::into_inner);
            map.get(name).cloned()
        };
        match breaker {
            Some(b) => Some(b.state().await),
            None => None,
        }
    }
}
