//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Initialize logging with sensible defaults.
///
/// If `RUST_LOG` is not set, defaults to "info" level for this crate.
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("dramafetch=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
