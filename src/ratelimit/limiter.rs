//! Distributed token-bucket rate limiter.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use redis::Script;
use thiserror::Error;
use tracing::warn;

use super::local::LocalBuckets;

/// Upper bound for any single backend operation.
const OP_TIMEOUT: Duration = Duration::from_secs(2);

/// Whole token-bucket transaction as one script, so concurrent checks on
/// the same key cannot lose updates. Allows when at least one token is
/// available after refill; the bucket expires after two idle windows.
static TOKEN_BUCKET_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local burst = tonumber(ARGV[3])
local current_time = tonumber(ARGV[4])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or burst
local last_refill = tonumber(bucket[2]) or current_time

local time_passed = current_time - last_refill
local tokens_to_add = math.floor(time_passed * (limit / window))
tokens = math.min(burst, tokens + tokens_to_add)

local allowed = 0
if tokens >= 1 then
    tokens = tokens - 1
    allowed = 1
end
redis.call('HMSET', key, 'tokens', tokens, 'last_refill', current_time)
redis.call('EXPIRE', key, window * 2)
return allowed
"#,
    )
});

#[derive(Debug, Error)]
enum LimiterError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("operation timed out")]
    Timeout,
}

/// Outcome of a rate-limit check.
///
/// `FailOpen` is the degraded-mode verdict: the backend errored, so the
/// request passes rather than letting the limiter become a point of
/// failure. Callers that need to distinguish it from a real `Allowed`
/// (alerting, shedding) can; `is_allowed` treats both as a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
    FailOpen,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, Decision::Denied)
    }
}

/// Token-bucket rate limiter: capacity `burst`, continuous refill at
/// `limit / window` tokens per second.
///
/// Checks run against the shared Redis backend when one is configured, so
/// every process enforces the same budget; otherwise against in-process
/// buckets. The limiter never blocks and never errors - backend trouble
/// fails open.
pub struct RateLimiter {
    namespace: String,
    redis: Option<redis::Client>,
    local: LocalBuckets,
}

impl RateLimiter {
    pub fn new(namespace: impl Into<String>, redis: Option<redis::Client>) -> Self {
        Self {
            namespace: namespace.into(),
            redis,
            local: LocalBuckets::new(epoch_seconds()),
        }
    }

    /// Check whether one request fits the budget, consuming a token if so.
    pub async fn check(
        &self,
        key: &str,
        limit: u32,
        window: Duration,
        burst: Option<u32>,
    ) -> Decision {
        let burst = burst.unwrap_or(limit);
        let now = epoch_seconds();

        match &self.redis {
            Some(client) => match self.redis_check(client, key, limit, window, burst, now).await {
                Ok(true) => Decision::Allowed,
                Ok(false) => Decision::Denied,
                Err(e) => {
                    warn!("rate limit check failed for {key}: {e}, failing open");
                    Decision::FailOpen
                }
            },
            None => {
                if self.local.check(key, limit, window, burst, now) {
                    Decision::Allowed
                } else {
                    Decision::Denied
                }
            }
        }
    }

    /// Boolean form of [`check`](Self::check) with `burst = limit`.
    pub async fn is_allowed(&self, key: &str, limit: u32, window: Duration) -> bool {
        self.check(key, limit, window, None).await.is_allowed()
    }

    /// Best-effort view of the tokens left in a bucket. Reports the full
    /// limit when the bucket does not exist or the backend is unreachable.
    pub async fn get_remaining(&self, key: &str, limit: u32) -> u32 {
        match &self.redis {
            Some(client) => match self.redis_remaining(client, key).await {
                Ok(Some(tokens)) => tokens.max(0.0) as u32,
                Ok(None) => limit,
                Err(e) => {
                    warn!("rate limit read failed for {key}: {e}");
                    limit
                }
            },
            None => self.local.remaining(key, limit),
        }
    }

    /// Administrative clear of a bucket.
    pub async fn reset(&self, key: &str) {
        match &self.redis {
            Some(client) => {
                let bucket_key = self.bucket_key(key);
                let result: Result<(), LimiterError> = async {
                    let mut conn = redis_conn(client).await?;
                    with_timeout(redis::cmd("DEL").arg(&bucket_key).query_async::<()>(&mut conn))
                        .await
                }
                .await;
                if let Err(e) = result {
                    warn!("failed to reset rate limit for {key}: {e}");
                }
            }
            None => self.local.reset(key),
        }
    }

    fn bucket_key(&self, key: &str) -> String {
        format!("{}:bucket:{}", self.namespace, key)
    }

    async fn redis_check(
        &self,
        client: &redis::Client,
        key: &str,
        limit: u32,
        window: Duration,
        burst: u32,
        now: f64,
    ) -> Result<bool, LimiterError> {
        let bucket_key = self.bucket_key(key);
        let mut conn = redis_conn(client).await?;
        let allowed: i64 = with_timeout(
            TOKEN_BUCKET_SCRIPT
                .key(&bucket_key)
                .arg(limit)
                .arg(window.as_secs())
                .arg(burst)
                .arg(now)
                .invoke_async(&mut conn),
        )
        .await?;
        Ok(allowed == 1)
    }

    async fn redis_remaining(
        &self,
        client: &redis::Client,
        key: &str,
    ) -> Result<Option<f64>, LimiterError> {
        let bucket_key = self.bucket_key(key);
        let mut conn = redis_conn(client).await?;
        let tokens: Option<f64> = with_timeout(
            redis::cmd("HGET")
                .arg(&bucket_key)
                .arg("tokens")
                .query_async(&mut conn),
        )
        .await?;
        Ok(tokens)
    }
}

fn epoch_seconds() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

async fn redis_conn(
    client: &redis::Client,
) -> Result<redis::aio::MultiplexedConnection, LimiterError> {
    match tokio::time::timeout(OP_TIMEOUT, client.get_multiplexed_async_connection()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(LimiterError::Timeout),
    }
}

async fn with_timeout<T>(
    fut: impl Future<Output = redis::RedisResult<T>>,
) -> Result<T, LimiterError> {
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(LimiterError::Timeout),
    }
}
