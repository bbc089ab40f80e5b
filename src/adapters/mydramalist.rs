//! MyDramaList adapter.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::http::HttpClient;
use crate::ratelimit::RateLimiter;

use super::{Quota, fill_endpoint};

/// One row of a drama search listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DramaSummary {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub thumb: Option<String>,
}

/// Detail payload for a single drama.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DramaDetails {
    pub title: String,
    #[serde(default)]
    pub synopsis: Option<String>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub episodes: Option<u32>,
    #[serde(default)]
    pub poster: Option<String>,
}

/// MyDramaList client over the fetch layer.
pub struct MyDramaList {
    http: Arc<HttpClient>,
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    search_url: String,
    details_url: String,
    default_ttl: Duration,
    search_quota: Quota,
    details_quota: Quota,
}

impl MyDramaList {
    pub fn new(
        http: Arc<HttpClient>,
        cache: Arc<CacheStore>,
        limiter: Arc<RateLimiter>,
        config: &Config,
    ) -> Self {
        Self {
            http,
            cache,
            limiter,
            search_url: config.mdl_search_url.clone(),
            details_url: config.mdl_details_url.clone(),
            default_ttl: config.cache_ttl,
            search_quota: Quota {
                limit: 30,
                window: Duration::from_secs(60),
            },
            details_quota: Quota {
                limit: 20,
                window: Duration::from_secs(60),
            },
        }
    }

    /// Search dramas by free-text query. Degrades to an empty listing on
    /// rate-limit denial or upstream failure.
    pub async fn search(&self, query: &str) -> Vec<DramaSummary> {
        let allowed = self
            .limiter
            .is_allowed("mydramalist", self.search_quota.limit, self.search_quota.window)
            .await;
        if !allowed {
            warn!("mydramalist search rate limit exceeded");
            return Vec::new();
        }

        info!("searching mydramalist for: {query}");
        let cache_key = format!("search:{query}");
        let url = fill_endpoint(&self.search_url, query);
        let http = self.http.clone();

        let result = self
            .cache
            .cached_call("mdl_search", &cache_key, self.default_ttl, false, move || async move {
                let body = http.get_json(&url).await;
                Ok(body
                    .as_ref()
                    .and_then(|v| v.pointer("/results/dramas"))
                    .and_then(|dramas| serde_json::from_value::<Vec<DramaSummary>>(dramas.clone()).ok()))
            })
            .await;

        match result {
            Ok(Some(dramas)) => dramas,
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("mydramalist search failed for '{query}': {e}");
                Vec::new()
            }
        }
    }

    /// Fetch drama details by slug.
    pub async fn details(&self, slug: &str) -> Option<DramaDetails> {
        let allowed = self
            .limiter
            .is_allowed(
                "mydramalist_details",
                self.details_quota.limit,
                self.details_quota.window,
            )
            .await;
        if !allowed {
            warn!("mydramalist details rate limit exceeded");
            return None;
        }

        info!("fetching mydramalist details for: {slug}");
        let cache_key = format!("details:{slug}");
        let url = fill_endpoint(&self.details_url, slug);
        let http = self.http.clone();

        let result = self
            .cache
            .cached_call("mdl_details", &cache_key, self.default_ttl, false, move || async move {
                let body = http.get_json(&url).await;
                Ok(body
                    .as_ref()
                    .and_then(|v| v.get("data"))
                    .and_then(|data| serde_json::from_value::<DramaDetails>(data.clone()).ok()))
            })
            .await;

        match result {
            Ok(details) => details,
            Err(e) => {
                error!("mydramalist details failed for '{slug}': {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicU32, Ordering};

    use axum::Router;
    use axum::routing::get;

    async fn spawn_server(router: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        addr
    }

    fn adapter_for(addr: SocketAddr) -> MyDramaList {
        let config = Config {
            mdl_search_url: format!("http://{addr}/search/{{}}"),
            mdl_details_url: format!("http://{addr}/id/{{}}"),
            ..Config::default()
        };
        MyDramaList::new(
            Arc::new(HttpClient::new(Duration::from_secs(2), 10).unwrap()),
            Arc::new(CacheStore::in_memory(1)),
            Arc::new(RateLimiter::new("api", None)),
            &config,
        )
    }

    fn search_payload() -> serde_json::Value {
        serde_json::json!({
            "results": {
                "dramas": [
                    {"slug": "33772-squid-game", "title": "Squid Game", "year": 2021,
                     "type": "Drama", "thumb": "https://i.example/sq.jpg"},
                    {"slug": "18452-goblin", "title": "Goblin", "year": 2016, "type": "Drama"}
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_search_parses_and_caches() {
        let hits = Arc::new(AtomicU32::new(0));
        let state = hits.clone();
        let router = Router::new().route(
            "/search/:q",
            get(move || {
                let hits = state.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::Json(search_payload())
                }
            }),
        );
        let addr = spawn_server(router).await;
        let adapter = adapter_for(addr);

        let first = adapter.search("squid game").await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].slug, "33772-squid-game");
        assert_eq!(first[0].year, Some(2021));

        // Second lookup is served from the cache.
        let second = adapter.search("squid game").await;
        assert_eq!(second, first);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rate_limit_denial_short_circuits() {
        let hits = Arc::new(AtomicU32::new(0));
        let state = hits.clone();
        let router = Router::new().route(
            "/search/:q",
            get(move || {
                let hits = state.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::Json(search_payload())
                }
            }),
        );
        let addr = spawn_server(router).await;
        let mut adapter = adapter_for(addr);
        adapter.search_quota = Quota {
            limit: 1,
            window: Duration::from_secs(60),
        };

        assert_eq!(adapter.search("first").await.len(), 2);
        // Budget exhausted: no upstream call is made.
        assert!(adapter.search("second").await.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_details_parses_payload() {
        let router = Router::new().route(
            "/id/:slug",
            get(|| async {
                axum::Json(serde_json::json!({
                    "data": {
                        "title": "Goblin",
                        "synopsis": "An immortal goblin seeks his bride.",
                        "rating": 8.9,
                        "country": "South Korea",
                        "episodes": 16
                    }
                }))
            }),
        );
        let addr = spawn_server(router).await;
        let adapter = adapter_for(addr);

        let details = adapter.details("18452-goblin").await.unwrap();
        assert_eq!(details.title, "Goblin");
        assert_eq!(details.episodes, Some(16));
        assert_eq!(details.rating, Some(8.9));
    }

    #[tokio::test]
    async fn test_upstream_failure_degrades_to_empty() {
        let router = Router::new().route(
            "/search/:q",
            get(|| async { (axum::http::StatusCode::NOT_FOUND, "nope") }),
        );
        let addr = spawn_server(router).await;
        let adapter = adapter_for(addr);

        assert!(adapter.search("anything").await.is_empty());
    }
}
