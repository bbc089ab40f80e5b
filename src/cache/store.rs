//! Cache store with soft single-flight fetch deduplication.

use std::future::Future;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::backend::Backend;
use super::ttl::ttl_for;

/// How long a fetch lock may be held before the backend reaps it. Bounds
/// the damage of a holder that crashed mid-fetch.
const LOCK_TTL: Duration = Duration::from_secs(30);

/// How long a contending caller waits before re-checking the cache.
const CONTENTION_DELAY: Duration = Duration::from_millis(100);

/// Attempts made while probing Redis connectivity at startup.
const CONNECT_RETRIES: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

enum LockState {
    Acquired,
    Contended,
    Unavailable,
}

/// Namespaced key-value cache over a shared Redis backend or an
/// in-process fallback.
///
/// Every operation is fail-open: when the backend is unreachable, `get`
/// reports a miss and `set`/`delete` report not-ok, with a WARN diagnostic.
/// Infrastructure trouble never surfaces as an error to the caller.
pub struct CacheStore {
    backend: Backend,
    version: u32,
}

impl CacheStore {
    /// Create a store over the in-process backend. Used for local runs,
    /// tests, and as the degraded mode when Redis is unreachable.
    pub fn in_memory(version: u32) -> Self {
        Self {
            backend: Backend::memory(),
            version,
        }
    }

    /// Create a store over an existing Redis client without probing it.
    pub fn with_client(client: redis::Client, version: u32) -> Self {
        Self {
            backend: Backend::redis(client),
            version,
        }
    }

    /// Connect to Redis and verify it responds.
    ///
    /// # Errors
    /// Returns an error if the URL does not parse or the server stays
    /// unreachable after a few attempts. The caller decides whether to
    /// fall back to [`CacheStore::in_memory`].
    pub async fn connect(url: &str, version: u32) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)?;
        let backend = Backend::redis(client);

        let mut attempt = 1;
        loop {
            match backend.ping().await {
                Ok(()) => break,
                Err(e) if attempt < CONNECT_RETRIES => {
                    warn!(
                        "redis connection failed (attempt {attempt}/{CONNECT_RETRIES}): {e}, retrying..."
                    );
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => anyhow::bail!("redis unreachable after {CONNECT_RETRIES} attempts: {e}"),
            }
        }

        info!("cache store connected to redis");
        Ok(Self { backend, version })
    }

    /// Composite cache key. The version prefix lets a config bump
    /// invalidate every entry at once.
    fn make_key(&self, namespace: &str, key: &str) -> String {
        format!("v{}:{}:{}", self.version, namespace, key)
    }

    /// Get a value from the cache. Returns `None` on miss, on backend
    /// failure, and on an entry that no longer decodes as `T`.
    pub async fn get<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Option<T> {
        let cache_key = self.make_key(namespace, key);
        let raw = match self.backend.read(&cache_key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!("cache get failed for {namespace}:{key}: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                // Schema drift between deployments; treat as a miss.
                warn!("cache entry for {namespace}:{key} did not decode: {e}");
                None
            }
        }
    }

    /// Store a value with the given TTL. Returns whether the write landed.
    pub async fn set<T: Serialize>(
        &self,
        namespace: &str,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                warn!("cache set failed to serialize {namespace}:{key}: {e}");
                return false;
            }
        };
        let cache_key = self.make_key(namespace, key);
        match self.backend.write(&cache_key, serialized, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!("cache set failed for {namespace}:{key}: {e}");
                false
            }
        }
    }

    /// Remove an entry. Used to invalidate on user-data changes. Returns
    /// whether the delete landed.
    pub async fn delete(&self, namespace: &str, key: &str) -> bool {
        let cache_key = self.make_key(namespace, key);
        match self.backend.remove(&cache_key).await {
            Ok(()) => true,
            Err(e) => {
                warn!("cache delete failed for {namespace}:{key}: {e}");
                false
            }
        }
    }

    /// Execute `fetch` with cache-aside semantics and soft single-flight
    /// deduplication.
    ///
    /// The happy path runs the fetch at most once per `(namespace, key)`
    /// across all processes sharing the backend: callers race for a
    /// short-lived lock, the winner fetches and writes back through the
    /// namespace TTL policy (`ttl` is the fallback for unknown
    /// namespaces), losers wait briefly and re-check. Under contention or
    /// a failing lock backend the losers fetch anyway - duplicate
    /// upstream work is accepted so that cache infrastructure can never
    /// block the caller.
    ///
    /// A `None` fetch result is only written back when `cache_absent` is
    /// set. Absent results are stored as JSON `null`, so a cached absence
    /// is a hit that returns `Ok(None)` without refetching.
    ///
    /// # Errors
    /// Propagates only errors returned by `fetch` itself; the lock (if
    /// held) is released first.
    pub async fn cached_call<T, F, Fut>(
        &self,
        namespace: &str,
        key: &str,
        ttl: Duration,
        cache_absent: bool,
        fetch: F,
    ) -> anyhow::Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        if let Some(hit) = self.get::<Option<T>>(namespace, key).await {
            debug!("cache hit for {namespace}:{key}");
            return Ok(hit);
        }

        let lock_key = format!("lock:{namespace}:{key}");
        match self.try_lock(&lock_key).await {
            LockState::Acquired => {
                // Double-checked: another holder may have filled the entry
                // between the first read and the lock grant.
                if let Some(hit) = self.get::<Option<T>>(namespace, key).await {
                    debug!("cache hit after lock for {namespace}:{key}");
                    self.unlock(&lock_key).await;
                    return Ok(hit);
                }

                debug!("cache miss for {namespace}:{key}, fetching under lock");
                let result = fetch().await;
                if let Ok(value) = &result
                    && (value.is_some() || cache_absent)
                {
                    self.set(namespace, key, value, ttl_for(namespace, ttl)).await;
                }
                // Release on success and error alike. A panicking fetch
                // leaves the lock to expire via its TTL.
                self.unlock(&lock_key).await;
                result
            }
            LockState::Contended => {
                // Another caller is fetching; give it a moment to finish.
                tokio::time::sleep(CONTENTION_DELAY).await;
                if let Some(hit) = self.get::<Option<T>>(namespace, key).await {
                    debug!("cache hit after waiting for {namespace}:{key}");
                    return Ok(hit);
                }
                // Still absent: fetch without the lock and without
                // write-back, accepting the duplicate upstream call.
                debug!("fetching without lock for {namespace}:{key}");
                fetch().await
            }
            LockState::Unavailable => {
                let result = fetch().await;
                if let Ok(value) = &result
                    && (value.is_some() || cache_absent)
                {
                    self.set(namespace, key, value, ttl_for(namespace, ttl)).await;
                }
                result
            }
        }
    }

    async fn try_lock(&self, lock_key: &str) -> LockState {
        match self
            .backend
            .write_if_absent(lock_key, "1".to_string(), LOCK_TTL)
            .await
        {
            Ok(true) => LockState::Acquired,
            Ok(false) => LockState::Contended,
            Err(e) => {
                warn!("lock acquire failed for {lock_key}: {e}, proceeding without lock");
                LockState::Unavailable
            }
        }
    }

    async fn unlock(&self, lock_key: &str) {
        if let Err(e) = self.backend.remove(lock_key).await {
            warn!("lock release failed for {lock_key}: {e}");
        }
    }
}
