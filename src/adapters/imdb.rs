//! IMDb adapter.
//!
//! Talks to a JSON search frontend and normalizes its payloads into the
//! compact shapes the bot's caption templates expect.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::cache::CacheStore;
use crate::config::Config;
use crate::http::HttpClient;
use crate::ratelimit::RateLimiter;

use super::{Quota, fill_endpoint};

/// One row of a title search listing, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub kind: Option<String>,
}

/// Detail payload for a single title, normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetails {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub rating: Option<f32>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub plot: Option<String>,
    #[serde(default)]
    pub poster: Option<String>,
}

/// IMDb client over the fetch layer.
pub struct Imdb {
    http: Arc<HttpClient>,
    cache: Arc<CacheStore>,
    limiter: Arc<RateLimiter>,
    search_url: String,
    details_url: String,
    default_ttl: Duration,
    search_quota: Quota,
    details_quota: Quota,
}

impl Imdb {
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
            search_url: config.imdb_search_url.clone(),
            details_url: config.imdb_details_url.clone(),
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

    /// Search movies and shows by title.
    pub async fn search(&self, query: &str) -> Vec<MovieSummary> {
        let allowed = self
            .limiter
            .is_allowed("imdb", self.search_quota.limit, self.search_quota.window)
            .await;
        if !allowed {
            warn!("imdb search rate limit exceeded");
            return Vec::new();
        }

        info!("searching imdb for: {query}");
        let cache_key = format!("search:{query}");
        let url = fill_endpoint(&self.search_url, query);
        let http = self.http.clone();

        let result = self
            .cache
            .cached_call("imdb_search", &cache_key, self.default_ttl, false, move || async move {
                let body = http.get_json(&url).await;
                Ok(body.map(|v| parse_search_results(&v)).filter(|m| !m.is_empty()))
            })
            .await;

        match result {
            Ok(Some(movies)) => movies,
            Ok(None) => Vec::new(),
            Err(e) => {
                error!("imdb search failed for '{query}': {e}");
                Vec::new()
            }
        }
    }

    /// Fetch title details by IMDb id (`tt...`).
    pub async fn details(&self, imdb_id: &str) -> Option<MovieDetails> {
        let allowed = self
            .limiter
            .is_allowed("imdb_details", self.details_quota.limit, self.details_quota.window)
            .await;
        if !allowed {
            warn!("imdb details rate limit exceeded");
            return None;
        }

        info!("fetching imdb details for: {imdb_id}");
        let cache_key = format!("details:{imdb_id}");
        let url = fill_endpoint(&self.details_url, imdb_id);
        let http = self.http.clone();
        let id = imdb_id.to_string();

        let result = self
            .cache
            .cached_call("imdb_details", &cache_key, self.default_ttl, false, move || async move {
                let body = http.get_json(&url).await;
                Ok(body.and_then(|v| parse_details(&id, &v)))
            })
            .await;

        match result {
            Ok(details) => details,
            Err(e) => {
                error!("imdb details failed for '{imdb_id}': {e}");
                None
            }
        }
    }
}

/// Normalize the search payload's `description` rows. Rows missing an id
/// or title are dropped.
fn parse_search_results(body: &Value) -> Vec<MovieSummary> {
    body.get("description")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    Some(MovieSummary {
                        id: row.get("#IMDB_ID")?.as_str()?.to_string(),
                        title: row.get("#TITLE")?.as_str()?.to_string(),
                        year: row.get("#YEAR").and_then(Value::as_u64).map(|y| y as u16),
                        kind: row.get("#TYPE").and_then(Value::as_str).map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Normalize the detail payload's schema.org `short` block.
fn parse_details(id: &str, body: &Value) -> Option<MovieDetails> {
    let short = body.get("short")?;
    Some(MovieDetails {
        id: id.to_string(),
        title: short.get("name")?.as_str()?.to_string(),
        year: short
            .get("datePublished")
            .and_then(Value::as_str)
            .and_then(|date| date.get(..4))
            .and_then(|year| year.parse().ok()),
        rating: short
            .pointer("/aggregateRating/ratingValue")
            .and_then(Value::as_f64)
            .map(|r| r as f32),
        genres: short
            .get("genre")
            .and_then(Value::as_array)
            .map(|genres| {
                genres
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        plot: short
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        poster: short.get("image").and_then(Value::as_str).map(str::to_string),
    })
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

    fn adapter_for(addr: SocketAddr) -> Imdb {
        let config = Config {
            imdb_search_url: format!("http://{addr}/search/{{}}"),
            imdb_details_url: format!("http://{addr}/title/{{}}"),
            ..Config::default()
        };
        Imdb::new(
            Arc::new(HttpClient::new(Duration::from_secs(2), 10).unwrap()),
            Arc::new(CacheStore::in_memory(1)),
            Arc::new(RateLimiter::new("api", None)),
            &config,
        )
    }

    #[test]
    fn test_parse_search_results_drops_incomplete_rows() {
        let body = serde_json::json!({
            "description": [
                {"#IMDB_ID": "tt0468569", "#TITLE": "The Dark Knight", "#YEAR": 2008},
                {"#TITLE": "No id here"},
                {"#IMDB_ID": "tt1375666", "#TITLE": "Inception", "#YEAR": 2010, "#TYPE": "movie"}
            ]
        });
        let movies = parse_search_results(&body);
        assert_eq!(movies.len(), 2);
        assert_eq!(movies[0].id, "tt0468569");
        assert_eq!(movies[1].kind.as_deref(), Some("movie"));
    }

    #[test]
    fn test_parse_details_reads_schema_org_block() {
        let body = serde_json::json!({
            "short": {
                "name": "Inception",
                "datePublished": "2010-07-16",
                "aggregateRating": {"ratingValue": 8.8},
                "genre": ["Action", "Sci-Fi"],
                "description": "A thief who steals corporate secrets...",
                "image": "https://i.example/inception.jpg"
            }
        });
        let details = parse_details("tt1375666", &body).unwrap();
        assert_eq!(details.title, "Inception");
        assert_eq!(details.year, Some(2010));
        assert_eq!(details.rating, Some(8.8));
        assert_eq!(details.genres, vec!["Action", "Sci-Fi"]);
    }

    #[test]
    fn test_parse_details_requires_a_title() {
        let body = serde_json::json!({"short": {"datePublished": "2010-07-16"}});
        assert!(parse_details("tt1", &body).is_none());
    }

    #[tokio::test]
    async fn test_search_caches_normalized_results() {
        let hits = Arc::new(AtomicU32::new(0));
        let state = hits.clone();
        let router = Router::new().route(
            "/search/:q",
            get(move || {
                let hits = state.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    axum::Json(serde_json::json!({
                        "description": [
                            {"#IMDB_ID": "tt1375666", "#TITLE": "Inception", "#YEAR": 2010}
                        ]
                    }))
                }
            }),
        );
        let addr = spawn_server(router).await;
        let adapter = adapter_for(addr);

        let first = adapter.search("inception").await;
        let second = adapter.search("inception").await;
        assert_eq!(first.len(), 1);
        assert_eq!(second, first);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
