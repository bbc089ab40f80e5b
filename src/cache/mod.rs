//! Cache module - cache-aside store with soft single-flight.
//!
//! ## Architecture
//!
//! - `CacheStore` - namespaced get/set/delete plus `cached_call`, over a
//!   shared Redis backend or an in-process fallback
//! - `ttl_for` - namespace volatility policy mapping a namespace to a TTL
//!
//! Keys are composed as `"v{version}:{namespace}:{key}"` so a version bump
//! invalidates everything cheaply. Values round-trip through JSON.
//!
//! ## Usage
//!
//! ```ignore
//! let store = CacheStore::in_memory(1);
//! let details: Option<Details> = store
//!     .cached_call("mdl_details", slug, default_ttl, false, || fetch_details(slug))
//!     .await?;
//! ```

mod backend;
mod store;
mod ttl;

pub use store::CacheStore;
pub use ttl::ttl_for;
