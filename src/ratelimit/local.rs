//! In-process token buckets, used when no shared backend is configured.

use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

/// Sweep for idle buckets at most this often.
const SWEEP_INTERVAL_SECS: f64 = 600.0;

/// Buckets untouched for this long are evicted by the sweep.
const IDLE_EVICT_SECS: f64 = 3600.0;

#[derive(Debug)]
pub(crate) struct Bucket {
    pub tokens: f64,
    pub last_refill: f64,
}

/// Per-key token buckets in a concurrent map.
///
/// The whole check-and-update for one key runs inside a single `entry()`
/// borrow with no await point, so interleaved tasks cannot observe a
/// half-updated bucket.
pub(crate) struct LocalBuckets {
    buckets: DashMap<String, Bucket>,
    last_sweep: Mutex<f64>,
}

impl LocalBuckets {
    pub fn new(now: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            last_sweep: Mutex::new(now),
        }
    }

    /// Refill the bucket for elapsed time and try to take one token.
    pub fn check(&self, key: &str, limit: u32, window: Duration, burst: u32, now: f64) -> bool {
        self.maybe_sweep(now);

        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket {
            tokens: burst as f64,
            last_refill: now,
        });

        let elapsed = (now - bucket.last_refill).max(0.0);
        let rate = limit as f64 / window.as_secs_f64();
        let tokens_to_add = (elapsed * rate).floor();
        bucket.tokens = (bucket.tokens + tokens_to_add).min(burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn remaining(&self, key: &str, limit: u32) -> u32 {
        self.buckets
            .get(key)
            .map(|bucket| bucket.tokens.max(0.0) as u32)
            .unwrap_or(limit)
    }

    pub fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    /// Evict buckets idle longer than the threshold, bounding memory for
    /// long-running processes with churning keys.
    fn maybe_sweep(&self, now: f64) {
        {
            let mut last = self.last_sweep.lock();
            if now - *last < SWEEP_INTERVAL_SECS {
                return;
            }
            *last = now;
        }

        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now - bucket.last_refill <= IDLE_EVICT_SECS);
        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            info!("evicted {evicted} idle rate limit buckets");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burst_then_deny() {
        let buckets = LocalBuckets::new(0.0);
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            assert!(buckets.check("k", 5, window, 5, 100.0));
        }
        assert!(!buckets.check("k", 5, window, 5, 100.0));
    }

    #[test]
    fn test_refill_after_token_period() {
        let buckets = LocalBuckets::new(0.0);
        let window = Duration::from_secs(60);

        for _ in 0..5 {
            buckets.check("k", 5, window, 5, 100.0);
        }
        assert!(!buckets.check("k", 5, window, 5, 100.0));

        // One token period at 5 per 60s is 12 seconds.
        assert!(buckets.check("k", 5, window, 5, 112.0));
        assert!(!buckets.check("k", 5, window, 5, 112.0));
    }

    #[test]
    fn test_refill_clamps_at_burst() {
        let buckets = LocalBuckets::new(0.0);
        let window = Duration::from_secs(60);

        buckets.check("k", 5, window, 5, 100.0);
        // A long idle stretch must not bank more than the burst.
        for _ in 0..5 {
            assert!(buckets.check("k", 5, window, 5, 2000.0));
        }
        assert!(!buckets.check("k", 5, window, 5, 2000.0));
    }

    #[test]
    fn test_sweep_evicts_idle_buckets() {
        let buckets = LocalBuckets::new(0.0);
        let window = Duration::from_secs(60);

        buckets.check("idle", 5, window, 5, 100.0);
        assert!(buckets.buckets.contains_key("idle"));

        // Next check lands past the sweep interval, and the idle bucket is
        // past the eviction threshold by then.
        buckets.check("busy", 5, window, 5, 100.0 + 4000.0);
        assert!(!buckets.buckets.contains_key("idle"));
        assert!(buckets.buckets.contains_key("busy"));
    }

    #[test]
    fn test_remaining_defaults_to_limit_for_unknown_key() {
        let buckets = LocalBuckets::new(0.0);
        assert_eq!(buckets.remaining("nope", 7), 7);
    }
}
