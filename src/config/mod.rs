//! Configuration module.
//!
//! Loads configuration from environment variables, with defaults suitable
//! for local development. Only `REDIS_URL` changes behavior structurally:
//! when unset, the cache and rate limiter run against their in-process
//! fallbacks instead of a shared backend.

use std::env;
use std::time::Duration;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Redis connection string. `None` selects the in-process backends.
    pub redis_url: Option<String>,

    /// MyDramaList search endpoint, `{}` is replaced with the query.
    pub mdl_search_url: String,
    /// MyDramaList details endpoint, `{}` is replaced with the slug.
    pub mdl_details_url: String,
    /// IMDb search endpoint, `{}` is replaced with the query.
    pub imdb_search_url: String,
    /// IMDb details endpoint, `{}` is replaced with the title id.
    pub imdb_details_url: String,

    /// Default timeout for upstream HTTP requests.
    pub http_timeout: Duration,
    /// Connection pool bound for the HTTP client.
    pub max_connections: usize,

    /// Default cache TTL for namespaces without a policy entry.
    pub cache_ttl: Duration,
    /// Cache key schema version. Bumping it invalidates every entry.
    pub cache_version: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            mdl_search_url: env::var("MDL_SEARCH_URL").unwrap_or(defaults.mdl_search_url),
            mdl_details_url: env::var("MDL_DETAILS_URL").unwrap_or(defaults.mdl_details_url),
            imdb_search_url: env::var("IMDB_SEARCH_URL").unwrap_or(defaults.imdb_search_url),
            imdb_details_url: env::var("IMDB_DETAILS_URL").unwrap_or(defaults.imdb_details_url),
            http_timeout: Duration::from_secs(parse_env("HTTP_TIMEOUT", 30)),
            max_connections: parse_env("MAX_CONNECTIONS", 100) as usize,
            cache_ttl: Duration::from_secs(parse_env("CACHE_TTL", 3600)),
            cache_version: parse_env("CACHE_VERSION", 1) as u32,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            mdl_search_url: "https://kuryana.tbdh.app/search/q/{}".to_string(),
            mdl_details_url: "https://kuryana.tbdh.app/id/{}".to_string(),
            imdb_search_url: "https://search.imdbot.workers.dev/?q={}".to_string(),
            imdb_details_url: "https://search.imdbot.workers.dev/?tt={}".to_string(),
            http_timeout: Duration::from_secs(30),
            max_connections: 100,
            cache_ttl: Duration::from_secs(3600),
            cache_version: 1,
        }
    }
}

fn parse_env(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.redis_url.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.cache_version, 1);
        assert!(config.mdl_search_url.contains("{}"));
    }
}
