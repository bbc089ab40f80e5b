//! Upstream adapters - the call sites of the fetch layer.
//!
//! Each adapter composes the three primitives the same way: ask the rate
//! limiter for admission, then run the HTTP fetch through `cached_call` so
//! concurrent lookups of the same title deduplicate. Failures degrade to
//! "no results"; the adapters never panic and never surface infrastructure
//! errors.

mod imdb;
mod mydramalist;

pub use imdb::{Imdb, MovieDetails, MovieSummary};
pub use mydramalist::{DramaDetails, DramaSummary, MyDramaList};

use std::time::Duration;

/// Per-operation rate budget.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Quota {
    pub limit: u32,
    pub window: Duration,
}

/// Substitute `value` into a `{}` endpoint template, percent-encoded.
pub(crate) fn fill_endpoint(template: &str, value: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    template.replace("{}", &encoded)
}
