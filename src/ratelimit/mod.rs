//! Rate limiting module - token buckets protecting upstream APIs.
//!
//! Buckets live in the shared Redis backend when one is configured
//! (key shape `"{namespace}:bucket:{key}"`, updated by a single scripted
//! transaction) and in an in-process map otherwise. The limiter answers
//! immediately and never blocks; backoff is the caller's decision.

mod limiter;
mod local;

pub use limiter::{Decision, RateLimiter};
