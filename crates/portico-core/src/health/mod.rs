//! Concurrent dependency health aggregation.
//!
//! Checks are registered during init and read-only afterwards. Each
//! `/health` request runs every check concurrently under one shared
//! deadline and produces a fresh snapshot — nothing is cached.

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// Shared deadline for one aggregation pass.
const DEFAULT_CHECK_DEADLINE: Duration = Duration::from_secs(5);

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

/// Composite health state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// One aggregation result: composite status plus per-dependency verdicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthState,
    pub services: BTreeMap<String, String>,
}

impl HealthSnapshot {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status == HealthState::Healthy
    }
}

/// Registry of named dependency checks.
pub struct HealthRegistry {
    checks: Vec<(String, CheckFn)>,
    deadline: Duration,
}

impl HealthRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            checks: Vec::new(),
            deadline: DEFAULT_CHECK_DEADLINE,
        }
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Registers a dependency check. Only called during init; the registry
    /// is read-only once serving.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        self.checks
            .push((name.into(), Arc::new(move || Box::pin(check()))));
    }

    /// Runs all checks concurrently under the shared deadline.
    pub async fn check_all(&self) -> HealthSnapshot {
        let deadline = self.deadline;
        let futures = self.checks.iter().map(|(name, check)| {
            let name = name.clone();
            let check = Arc::clone(check);
            async move {
                let verdict = match tokio::time::timeout(deadline, check()).await {
                    Ok(Ok(())) => "healthy".to_string(),
                    Ok(Err(reason)) => format!("unhealthy: {reason}"),
                    Err(_) => "unhealthy: health check timed out".to_string(),
                };
                (name, verdict)
            }
        });

        let results = join_all(futures).await;
        let mut status = HealthState::Healthy;
        let mut services = BTreeMap::new();
        for (name, verdict) in results {
            if verdict != "healthy" {
                status = HealthState::Degraded;
            }
            services.insert(name, verdict);
        }
        HealthSnapshot { status, services }
    }

    /// Number of registered checks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
