//! Dramafetch - Resilient fetch layer for drama/movie lookup bots
//!
//! Everything a lookup bot needs between a command handler and a slow,
//! rate-limited upstream API: a cache-aside store with soft single-flight
//! deduplication, a namespace-aware TTL policy, a distributed token-bucket
//! rate limiter with an in-process fallback, and a retrying HTTP client.
//!
//! ## Architecture
//!
//! - `config` - Environment configuration
//! - `logging` - Tracing subscriber setup
//! - `cache` - Redis-backed cache store with in-process fallback and
//!   soft single-flight `cached_call`
//! - `ratelimit` - Distributed token-bucket rate limiter
//! - `http` - Pooled, retrying HTTP client
//! - `adapters` - MyDramaList / IMDb call sites built on the layer
//! - `services` - Explicit service composition with start/close lifecycle
//!
//! All infrastructure failures degrade instead of erroring: the cache acts
//! as a permanent miss, the limiter fails open, the lock is skipped. The
//! only errors that cross the API boundary come from the caller-supplied
//! fetch functions themselves.

pub mod adapters;
pub mod cache;
pub mod config;
pub mod http;
pub mod logging;
pub mod ratelimit;
pub mod services;

pub use cache::{CacheStore, ttl_for};
pub use config::Config;
pub use http::HttpClient;
pub use ratelimit::{Decision, RateLimiter};
pub use services::Services;
