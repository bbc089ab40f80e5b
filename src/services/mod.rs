//! Service composition with an explicit lifecycle.
//!
//! One `Services` value per process replaces module-level singletons: it
//! owns the shared cache store, HTTP client and the limiter instances, and
//! hands `Arc` references to the components that need them. `start`
//! performs the only fallible work (building the HTTP pool, probing
//! Redis); a probe failure downgrades to the in-process backends instead
//! of refusing to start.

use std::sync::Arc;

use tracing::{info, warn};

use crate::adapters::{Imdb, MyDramaList};
use crate::cache::CacheStore;
use crate::config::Config;
use crate::http::HttpClient;
use crate::ratelimit::RateLimiter;

/// Shared per-process service instances.
pub struct Services {
    pub config: Config,
    pub cache: Arc<CacheStore>,
    pub http: Arc<HttpClient>,
    /// Budgets for calls to external APIs.
    pub api_limiter: Arc<RateLimiter>,
    /// Budgets for individual bot users.
    pub user_limiter: Arc<RateLimiter>,
    /// Overall process protection.
    pub global_limiter: Arc<RateLimiter>,
    pub mydramalist: MyDramaList,
    pub imdb: Imdb,
}

impl Services {
    /// Build and start every service in dependency order.
    pub async fn start(config: Config) -> anyhow::Result<Self> {
        info!("starting services...");

        let http = Arc::new(HttpClient::new(config.http_timeout, config.max_connections)?);

        let (cache, redis_client) = match &config.redis_url {
            Some(url) => match CacheStore::connect(url, config.cache_version).await {
                Ok(store) => {
                    let client = redis::Client::open(url.as_str())?;
                    (Arc::new(store), Some(client))
                }
                Err(e) => {
                    warn!("redis unavailable, using in-process fallbacks: {e}");
                    (Arc::new(CacheStore::in_memory(config.cache_version)), None)
                }
            },
            None => (Arc::new(CacheStore::in_memory(config.cache_version)), None),
        };

        let api_limiter = Arc::new(RateLimiter::new("api", redis_client.clone()));
        let user_limiter = Arc::new(RateLimiter::new("user", redis_client.clone()));
        let global_limiter = Arc::new(RateLimiter::new("global", redis_client));

        let mydramalist = MyDramaList::new(
            http.clone(),
            cache.clone(),
            api_limiter.clone(),
            &config,
        );
        let imdb = Imdb::new(http.clone(), cache.clone(), api_limiter.clone(), &config);

        info!("all services started");
        Ok(Self {
            config,
            cache,
            http,
            api_limiter,
            user_limiter,
            global_limiter,
            mydramalist,
            imdb,
        })
    }

    /// Stop the services. Backend connections are established per
    /// operation and the HTTP pool closes on drop, so this only marks the
    /// lifecycle boundary.
    pub async fn close(&self) {
        info!("services stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_start_without_redis_uses_in_process_backends() {
        let services = Services::start(Config::default()).await.unwrap();

        // The in-process cache round-trips.
        assert!(
            services
                .cache
                .set("ns", "k", &1u32, Duration::from_secs(60))
                .await
        );
        let got: Option<u32> = services.cache.get("ns", "k").await;
        assert_eq!(got, Some(1));

        // The in-process limiter enforces budgets.
        let window = Duration::from_secs(60);
        assert!(services.user_limiter.is_allowed("u", 1, window).await);
        assert!(!services.user_limiter.is_allowed("u", 1, window).await);

        services.close().await;
    }

    #[tokio::test]
    async fn test_start_with_unreachable_redis_degrades() {
        let config = Config {
            redis_url: Some("redis://127.0.0.1:6399/".to_string()),
            ..Config::default()
        };
        let services = Services::start(config).await.unwrap();

        // Degraded to the in-process cache: writes still land.
        assert!(
            services
                .cache
                .set("ns", "k", &2u32, Duration::from_secs(60))
                .await
        );
        let got: Option<u32> = services.cache.get("ns", "k").await;
        assert_eq!(got, Some(2));
    }
}
