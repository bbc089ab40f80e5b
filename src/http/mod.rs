//! HTTP module - resilient client for upstream JSON APIs.

mod client;

pub use client::{DEFAULT_MAX_RETRIES, HttpClient};
