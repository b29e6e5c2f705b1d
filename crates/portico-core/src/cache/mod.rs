//! Two-level caching: cost-bounded in-process L1 in front of a shared L2.
//!
//! Reads try L1 first and repopulate it from L2 on a hit there. Writes go
//! to L2 first so an L2 failure leaves L1 untouched; deletes go to both and
//! surface either failure. Values are opaque byte strings — callers handle
//! their own (de)serialization, with JSON helpers for the common case.

mod redis_store;

pub use redis_store::RedisStore;

use async_trait::async_trait;
use bytes::Bytes;
use moka::{future::Cache, Expiry};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The L2 store failed or was unreachable.
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A typed helper failed to (de)serialize the value.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Contract consumed from the shared L2 store: a key-value store with TTLs
/// and connection pooling behind it.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the value and its remaining TTL. `None` TTL means the key
    /// has no expiration.
    async fn get_with_ttl(&self, key: &str)
        -> Result<Option<(Vec<u8>, Option<Duration>)>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Liveness probe for the health aggregator.
    async fn ping(&self) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct Entry {
    bytes: Bytes,
    expires_at: Instant,
}

struct EntryExpiry;

impl Expiry<String, Entry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.expires_at.saturating_duration_since(Instant::now()))
    }
}

/// Process-local L1 + shared L2 cache with coherent get/set/delete.
///
/// L1 admission and eviction are cost-based: the cost of an entry is the
/// byte length of its serialized value, bounded by `l1_max_cost`. Entries
/// also expire at their absolute expiration. Without an L2 the cache runs
/// in L1-only mode.
pub struct TieredCache {
    l1: Cache<String, Entry>,
    l2: Option<Arc<dyn RemoteStore>>,
    l1_max_ttl: Duration,
}

impl TieredCache {
    #[must_use]
    pub fn new(l1_max_cost: u64, l1_max_ttl: Duration, l2: Option<Arc<dyn RemoteStore>>) -> Self {
        let l1 = Cache::builder()
            .weigher(|_key: &String, entry: &Entry| {
                u32::try_from(entry.bytes.len()).unwrap_or(u32::MAX)
            })
            .max_capacity(l1_max_cost)
            .expire_after(EntryExpiry)
            .build();
        Self { l1, l2, l1_max_ttl }
    }

    /// Looks up `key`, consulting L1 then L2.
    ///
    /// On an L1 miss with an L2 hit, L1 is repopulated with
    /// `min(remaining L2 TTL, L1 max TTL)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the L2 lookup fails.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, CacheError> {
        if let Some(entry) = self.l1.get(key).await {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.bytes));
            }
            self.l1.invalidate(key).await;
        }

        let Some(l2) = &self.l2 else {
            return Ok(None);
        };

        match l2.get_with_ttl(key).await? {
            Some((value, remaining)) => {
                let bytes = Bytes::from(value);
                let ttl = remaining
                    .map_or(self.l1_max_ttl, |r| r.min(self.l1_max_ttl));
                if ttl > Duration::ZERO {
                    self.l1
                        .insert(
                            key.to_string(),
                            Entry {
                                bytes: bytes.clone(),
                                expires_at: Instant::now() + ttl,
                            },
                        )
                        .await;
                }
                Ok(Some(bytes))
            }
            None => Ok(None),
        }
    }

    /// Stores `value` under `key` with the given TTL in both levels.
    ///
    /// L2 is written first; if it fails the call fails and L1 is untouched.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the L2 write fails.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), CacheError> {
        if let Some(l2) = &self.l2 {
            l2.set(key, &value, ttl).await?;
        }
        let l1_ttl = ttl.min(self.l1_max_ttl);
        self.l1
            .insert(
                key.to_string(),
                Entry {
                    bytes: value,
                    expires_at: Instant::now() + l1_ttl,
                },
            )
            .await;
        Ok(())
    }

    /// Removes `key` from both levels.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the L2 delete fails; L1 is
    /// invalidated regardless.
    pub async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.l1.invalidate(key).await;
        if let Some(l2) = &self.l2 {
            l2.delete(key).await?;
        }
        Ok(())
    }

    /// Reports whether `key` is present in either level.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the L2 lookup fails.
    pub async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        if let Some(entry) = self.l1.get(key).await {
            if entry.expires_at > Instant::now() {
                return Ok(true);
            }
        }
        match &self.l2 {
            Some(l2) => l2.exists(key).await,
            None => Ok(false),
        }
    }

    /// Typed read: deserializes the cached JSON value.
    ///
    /// # Errors
    ///
    /// Backend errors propagate; a value that fails to deserialize is
    /// reported as a [`CacheError::Serialization`].
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Typed write: serializes `value` as JSON.
    ///
    /// # Errors
    ///
    /// See [`set`](Self::set); serialization failures are reported as
    /// [`CacheError::Serialization`].
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.set(key, bytes, ttl).await
    }

    /// Number of entries currently resident in L1.
    #[must_use]
    pub fn l1_entry_count(&self) -> u64 {
        self.l1.entry_count()
    }
}
