//! Per-key token-bucket rate limiting with background reclamation.
//!
//! The registry is guarded by one reader-preferring lock: the fast path
//! takes a read lock to find an existing bucket; a miss escalates to a
//! write lock with a double-check. Each bucket's token accounting is
//! synchronized by its own mutex, so concurrent callers on the same key
//! never race the map lock against the arithmetic.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};
use tokio::sync::broadcast;

/// Default idle lifetime before a bucket becomes eligible for reclamation.
const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

/// Default interval between sweeper passes.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(600);

#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    last_access: Instant,
}

/// Token-bucket rate limiter keyed by caller identity.
///
/// A bucket of capacity `burst` refills at `rps` tokens per second. The
/// limiter is oblivious to key structure; the middleware composes
/// `tenant:ip` or plain `ip` keys. `allow` never blocks and never fails:
/// memory growth is bounded by reclamation, not by rejecting inserts.
pub struct RateLimiter {
    buckets: RwLock<HashMap<String, Arc<Mutex<TokenBucket>>>>,
    rps: f64,
    burst: u32,
    idle_ttl: Duration,
    sweep_interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter refilling at `rps` tokens/second with capacity `burst`.
    #[must_use]
    pub fn new(rps: f64, burst: u32) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            rps,
            burst,
            idle_ttl: DEFAULT_IDLE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Overrides the idle TTL and sweep interval.
    #[must_use]
    pub fn with_reclamation(mut self, idle_ttl: Duration, sweep_interval: Duration) -> Self {
        self.idle_ttl = idle_ttl;
        self.sweep_interval = sweep_interval;
        self
    }

    /// Admits or rejects one request for `key`. Non-blocking.
    ///
    /// A bucket is created full on first observation of the key, so a burst
    /// of exactly `burst` requests from a fresh key is fully admitted.
    #[must_use]
    pub fn allow(&self, key: &str) -> bool {
        let now = Instant::now();

        let existing = {
            let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
            map.get(key).cloned()
        };
        if let Some(bucket) = existing {
            return self.admit(&bucket, now);
        }

        // Miss: escalate to the write lock and re-check before inserting.
        let bucket = {
            let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
            map.entry(key.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(TokenBucket {
                        tokens: f64::from(self.burst),
                        last_refill: now,
                        last_access: now,
                    }))
                })
                .clone()
        };
        self.admit(&bucket, now)
    }

    fn admit(&self, bucket: &Mutex<TokenBucket>, now: Instant) -> bool {
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        bucket.last_access = now;

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = elapsed.as_secs_f64() * self.rps;
        if refill > 0.0 {
            bucket.tokens = (bucket.tokens + refill).min(f64::from(self.burst));
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Removes every bucket idle for longer than the configured TTL.
    ///
    /// Runs under the single map mutation lock. Returns the number of
    /// reclaimed entries.
    pub fn sweep_once(&self) -> usize {
        let now = Instant::now();
        let mut map = self.buckets.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();
        map.retain(|_, bucket| {
            let bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
            now.saturating_duration_since(bucket.last_access) <= self.idle_ttl
        });
        before - map.len()
    }

    /// Starts the background sweeper, bound to the lifecycle signal.
    ///
    /// The task ticks at the sweep interval and terminates when the
    /// shutdown broadcast fires.
    pub fn start_sweeper(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(limiter.sweep_interval);
            // The first tick fires immediately; skip it so a fresh process
            // does not sweep an empty map.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = limiter.sweep_once();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = limiter.bucket_count(), "reclaimed idle rate-limit buckets");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("rate limiter sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }

    /// Number of live buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[doc(hidden)]
    #[must_use]
    pub fn bucket_tokens(&self, key: &str) -> Option<f64> {
        let map = self.buckets.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key)
            .map(|b| b.lock().unwrap_or_else(PoisonError::into_inner).tokens)
    }
}
