//! Pooled, retrying HTTP client for upstream JSON APIs.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{CONTENT_TYPE, HeaderMap};
use serde_json::Value;
use tracing::{debug, error, warn};

/// Retries after the first attempt, unless the caller overrides.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff cap, bounding worst-case latency of a retried call.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

const IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const KEEPALIVE: Duration = Duration::from_secs(60);
const MAX_IDLE_PER_HOST: usize = 30;

const USER_AGENT: &str = concat!("dramafetch/", env!("CARGO_PKG_VERSION"));

/// HTTP client over a single pooled connection manager.
///
/// `get` never returns an error: upstream failures are retried with capped
/// exponential backoff and ultimately degrade to `None`, pushing the
/// "no data" handling to the caller. Client errors (4xx) are not retried.
pub struct HttpClient {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpClient {
    /// Build the pooled client. `max_connections` bounds idle connections
    /// kept per host (capped at 30, matching upstream politeness).
    pub fn new(timeout: Duration, max_connections: usize) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(max_connections.min(MAX_IDLE_PER_HOST))
            .pool_idle_timeout(IDLE_TIMEOUT)
            .tcp_keepalive(KEEPALIVE)
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            default_timeout: timeout,
        })
    }

    /// GET with defaults: no query, no extra headers, standard retries.
    pub async fn get_json(&self, url: &str) -> Option<Value> {
        self.get(url, &[], None, DEFAULT_MAX_RETRIES, None).await
    }

    /// GET `url` and parse the body as JSON.
    ///
    /// Per attempt: timeouts, connection errors and 5xx responses are
    /// retried with `min(60s, 2^attempt + jitter)` backoff; 4xx responses
    /// return `None` immediately. An unparseable body logs a warning and
    /// returns `None` rather than raising.
    pub async fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        headers: Option<HeaderMap>,
        max_retries: u32,
        timeout: Option<Duration>,
    ) -> Option<Value> {
        let request_timeout = timeout.unwrap_or(self.default_timeout);

        for attempt in 0..=max_retries {
            let mut request = self.client.get(url).timeout(request_timeout);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(headers) = &headers {
                request = request.headers(headers.clone());
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        debug!("GET {url} -> {status}");
                        return decode_json_body(url, response).await;
                    }
                    if !status.is_server_error() {
                        // Caller error is not transient.
                        warn!("GET {url} returned {status}, not retrying");
                        return None;
                    }
                    if attempt == max_retries {
                        error!("GET {url} failed with {status} after {} attempts", attempt + 1);
                        return None;
                    }
                }
                Err(e) => {
                    if attempt == max_retries {
                        error!("GET {url} failed after {} attempts: {e}", attempt + 1);
                        return None;
                    }
                }
            }

            let delay = backoff_delay(attempt);
            warn!(
                "GET {url} failed (attempt {}), retrying in {:.1}s",
                attempt + 1,
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
        }

        None
    }
}

async fn decode_json_body(url: &str, response: reqwest::Response) -> Option<Value> {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    if content_type.contains("application/json") {
        return match response.json::<Value>().await {
            Ok(body) => Some(body),
            Err(e) => {
                warn!("GET {url} returned undecodable JSON: {e}");
                None
            }
        };
    }

    // Some upstreams serve JSON under a generic content type; try anyway.
    let text = match response.text().await {
        Ok(text) => text,
        Err(e) => {
            warn!("GET {url} body read failed: {e}");
            return None;
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(body) => Some(body),
        Err(_) => {
            warn!("non-JSON response from {url}: {content_type}");
            None
        }
    }
}

/// Exponential backoff with jitter, so stalled callers do not retry in
/// lockstep against a recovering upstream.
fn backoff_delay(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt) as f64;
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    Duration::from_secs_f64((base + jitter).min(MAX_BACKOFF.as_secs_f64()))
}
