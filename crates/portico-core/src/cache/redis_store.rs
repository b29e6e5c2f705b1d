//! Redis-backed implementation of the shared L2 store.

use super::{CacheError, RemoteStore};
use async_trait::async_trait;
use deadpool_redis::{Config as PoolSettings, Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use std::time::Duration;

/// Pooled Redis client implementing the [`RemoteStore`] contract.
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Builds a connection pool against `url` with at most `pool_size`
    /// connections. The pool is lazy; use [`ping`](RemoteStore::ping) to
    /// verify reachability at startup.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Backend`] when the URL is invalid or the pool
    /// cannot be constructed.
    pub fn connect(url: &str, pool_size: usize) -> Result<Self, CacheError> {
        let mut settings = PoolSettings::from_url(url);
        settings.pool = Some(PoolConfig::new(pool_size));
        let pool = settings
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::Backend(format!("redis pool init failed: {e}")))?;
        Ok(Self { pool })
    }

    /// Closes the pool; outstanding connections are dropped as they return.
    pub fn close(&self) {
        self.pool.close();
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection, CacheError> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::Backend(format!("redis connection unavailable: {e}")))
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get_with_ttl(
        &self,
        key: &str,
    ) -> Result<Option<(Vec<u8>, Option<Duration>)>, CacheError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let Some(value) = value else {
            return Ok(None);
        };

        // PTTL: -1 = no expiration, -2 = key vanished between the calls.
        let pttl: i64 = conn
            .pttl(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))?;
        let remaining = match pttl {
            p if p > 0 => Some(Duration::from_millis(u64::try_from(p).unwrap_or(0))),
            -1 => None,
            _ => return Ok(None),
        };
        Ok(Some((value, remaining)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, seconds)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        conn.exists(key)
            .await
            .map_err(|e| CacheError::Backend(e.to_string()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|e| CacheError::Backend(e.to_string()))
    }
}
