//! Storage backends for the cache store.
//!
//! Two backends share one raw string-keyed contract: a shared Redis
//! instance for multi-process deployments, and an in-process Moka cache
//! with per-entry TTL for local or degraded operation. Errors stay inside
//! this module's `Result`s; the public cache API fails open on all of them.

use std::future::Future;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;
use thiserror::Error;
use tracing::debug;

/// Upper bound for any single backend operation. A hung Redis must not
/// stall request handling; the caller degrades to a miss instead.
const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default entry bound for the in-process backend.
const MEMORY_CAPACITY: u64 = 10_000;

#[derive(Debug, Error)]
pub(crate) enum BackendError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("operation timed out")]
    Timeout,
}

/// Value plus the TTL it was written with. The TTL rides along so the
/// Moka expiry policy can read it back per entry.
#[derive(Clone)]
pub(crate) struct StoredEntry {
    pub payload: String,
    pub ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, StoredEntry> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        entry: &StoredEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

pub(crate) enum Backend {
    Redis(redis::Client),
    Memory(Cache<String, StoredEntry>),
}

impl Backend {
    pub fn memory() -> Self {
        let cache = Cache::builder()
            .max_capacity(MEMORY_CAPACITY)
            .expire_after(PerEntryTtl)
            .build();
        debug!("in-process cache backend initialized");
        Backend::Memory(cache)
    }

    pub fn redis(client: redis::Client) -> Self {
        Backend::Redis(client)
    }

    /// Verify the backend is reachable.
    pub async fn ping(&self) -> Result<(), BackendError> {
        match self {
            Backend::Redis(client) => {
                let mut conn = redis_conn(client).await?;
                with_timeout(redis::cmd("PING").query_async::<()>(&mut conn)).await
            }
            Backend::Memory(_) => Ok(()),
        }
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>, BackendError> {
        match self {
            Backend::Redis(client) => {
                let mut conn = redis_conn(client).await?;
                let value: Option<String> =
                    with_timeout(redis::cmd("GET").arg(key).query_async(&mut conn)).await?;
                Ok(value)
            }
            Backend::Memory(cache) => Ok(cache.get(key).await.map(|entry| entry.payload)),
        }
    }

    pub async fn write(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), BackendError> {
        match self {
            Backend::Redis(client) => {
                let mut conn = redis_conn(client).await?;
                with_timeout(
                    redis::cmd("SETEX")
                        .arg(key)
                        .arg(ttl.as_secs().max(1))
                        .arg(value)
                        .query_async::<()>(&mut conn),
                )
                .await
            }
            Backend::Memory(cache) => {
                cache
                    .insert(key.to_string(), StoredEntry { payload: value, ttl })
                    .await;
                Ok(())
            }
        }
    }

    /// Atomic set-if-absent with TTL. Returns whether the key was written.
    pub async fn write_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<bool, BackendError> {
        match self {
            Backend::Redis(client) => {
                let mut conn = redis_conn(client).await?;
                let set: Option<String> = with_timeout(
                    redis::cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("NX")
                        .arg("EX")
                        .arg(ttl.as_secs().max(1))
                        .query_async(&mut conn),
                )
                .await?;
                Ok(set.is_some())
            }
            Backend::Memory(cache) => {
                let entry = cache
                    .entry(key.to_string())
                    .or_insert(StoredEntry { payload: value, ttl })
                    .await;
                Ok(entry.is_fresh())
            }
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), BackendError> {
        match self {
            Backend::Redis(client) => {
                let mut conn = redis_conn(client).await?;
                with_timeout(redis::cmd("DEL").arg(key).query_async::<()>(&mut conn)).await
            }
            Backend::Memory(cache) => {
                cache.invalidate(key).await;
                Ok(())
            }
        }
    }
}

async fn redis_conn(
    client: &redis::Client,
) -> Result<redis::aio::MultiplexedConnection, BackendError> {
    match tokio::time::timeout(OP_TIMEOUT, client.get_multiplexed_async_connection()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BackendError::Timeout),
    }
}

async fn with_timeout<T>(
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, BackendError> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(BackendError::Timeout),
    }
}
