// src/connectors/mod.rs
//
// Venue adapters. Each venue gets one client that owns its HTTP schedule and
// backoff state; pagination contracts live in `pagination`.

pub mod binance;
pub mod bybit;
pub mod coinbase;
pub mod okx;
pub mod pagination;
pub mod upbit;

#[cfg(test)]
pub(crate) mod test_server;

pub use binance::BinanceClient;
pub use bybit::BybitClient;
pub use coinbase::CoinbaseClient;
pub use okx::OkxClient;
pub use upbit::UpbitClient;

use crate::error::VenueFetchError;
use crate::models::{Candle, Venue};
use crate::traits::SharedVenueClient;
use log::{debug, warn};
use rand::Rng;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

const USER_AGENT: &str = "venue-quant/daily-histories";
const REQUEST_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// Retry Policy
// =============================================================================

/// Backoff and pacing settings for one venue client.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt before giving up.
    pub max_retries: u32,
    /// First backoff ceiling in milliseconds; doubles per retry.
    pub base_delay_ms: u64,
    /// Upper bound for any single backoff.
    pub max_delay_ms: u64,
    /// Minimum spacing between two requests to the same venue.
    pub min_request_interval_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            min_request_interval_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Deterministic ceiling for the backoff before retry number `attempt` (0-based).
    pub fn backoff_ceiling_ms(&self, attempt: u32) -> u64 {
        let exp_pow = attempt.min(63);
        let multiplier = 1u64.checked_shl(exp_pow).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }

    /// Full-jitter backoff: uniform in `[0, ceiling]`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling_ms(attempt);
        let ms = if ceiling == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=ceiling)
        };
        Duration::from_millis(ms)
    }
}

/// Outcome of a single attempt inside `with_retry`.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptError {
    /// Rate limit or transient failure; `retry_after` overrides the jittered backoff.
    Retryable {
        cause: String,
        retry_after: Option<Duration>,
    },
    /// Not worth retrying (bad request, undecodable payload).
    Fatal(String),
}

/// Runs `op` until it succeeds, fails fatally, or exhausts `policy.max_retries`.
pub async fn with_retry<T, F, Fut>(
    venue: Venue,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, VenueFetchError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut attempt = 0u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Fatal(cause)) => return Err(VenueFetchError::new(venue, cause)),
            Err(AttemptError::Retryable { cause, retry_after }) => {
                if attempt >= policy.max_retries {
                    return Err(VenueFetchError::new(
                        venue,
                        format!("{} (gave up after {} retries)", cause, attempt),
                    ));
                }
                let max_delay = Duration::from_millis(policy.max_delay_ms);
                let delay = retry_after
                    .map(|d| d.min(max_delay))
                    .unwrap_or_else(|| policy.backoff(attempt));
                warn!(
                    "{}: {}; retry {}/{} in {} ms",
                    venue,
                    cause,
                    attempt + 1,
                    policy.max_retries,
                    delay.as_millis()
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

// =============================================================================
// HTTP Fetcher
// =============================================================================

/// JSON-over-HTTP access for one venue.
///
/// Every request goes through `schedule`, so calls to one venue run strictly
/// one at a time and at least `min_request_interval_ms` apart, retries included.
pub struct HttpFetcher {
    venue: Venue,
    client: reqwest::Client,
    policy: RetryPolicy,
    schedule: Mutex<Option<Instant>>,
}

impl HttpFetcher {
    pub fn new(venue: Venue, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            venue,
            client,
            policy,
            schedule: Mutex::new(None),
        }
    }

    /// GETs `url` with `query` and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, VenueFetchError> {
        let mut last_request = self.schedule.lock().await;
        let min_interval = Duration::from_millis(self.policy.min_request_interval_ms);

        with_retry(self.venue, &self.policy, |_attempt| {
            let wait_until = last_request.map(|t| t + min_interval);
            *last_request = Some(Instant::now());
            async move {
                if let Some(deadline) = wait_until {
                    tokio::time::sleep_until(deadline).await;
                }
                debug!("{}: GET {} {:?}", self.venue, url, query);
                let response = self
                    .client
                    .get(url)
                    .query(query)
                    .header("Accept", "application/json")
                    .send()
                    .await
                    .map_err(classify_transport_error)?;

                let status = response.status();
                if !status.is_success() {
                    let retry_after = response
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse::<u64>().ok())
                        .map(Duration::from_secs);
                    return Err(classify_status(status, url, retry_after));
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| AttemptError::Fatal(format!("failed to parse response from {}: {}", url, e)))
            }
        })
        .await
    }
}

fn classify_status(status: StatusCode, url: &str, retry_after: Option<Duration>) -> AttemptError {
    // 418 is Binance's escalation after ignored 429s.
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.as_u16() == 418
        || status.is_server_error()
    {
        AttemptError::Retryable {
            cause: format!("{} returned HTTP {}", url, status),
            retry_after,
        }
    } else {
        AttemptError::Fatal(format!("{} returned HTTP {}", url, status))
    }
}

fn classify_transport_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        AttemptError::Retryable {
            cause: format!("network error: {}", e),
            retry_after: None,
        }
    } else {
        AttemptError::Fatal(format!("HTTP request failed: {}", e))
    }
}

// =============================================================================
// Payload Helpers
// =============================================================================

/// Parses a decimal from a JSON string or number, accepting scientific notation.
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal_str(s),
        Value::Number(n) => parse_decimal_str(&n.to_string()),
        _ => None,
    }
}

pub fn parse_decimal_str(s: &str) -> Option<Decimal> {
    let s = s.trim();
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Reads an integer timestamp encoded as a JSON number or numeric string.
pub fn parse_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Builds a candle from `[open, high, low, close, volume]` JSON fields.
pub fn candle_from_fields(
    venue: Venue,
    timestamp: i64,
    fields: [&Value; 5],
) -> Result<Candle, VenueFetchError> {
    let mut parsed = [Decimal::ZERO; 5];
    for (slot, value) in parsed.iter_mut().zip(fields.iter()) {
        *slot = parse_decimal(value).ok_or_else(|| {
            VenueFetchError::new(venue, format!("bad numeric field {} at {}", value, timestamp))
        })?;
    }
    let [open, high, low, close, volume] = parsed;
    Ok(Candle::new(timestamp, open, high, low, close, volume))
}

/// Builds a candle from a positional kline row `[ts, open, high, low, close, volume, ...]`.
pub fn candle_from_row(venue: Venue, row: &[Value]) -> Result<Candle, VenueFetchError> {
    if row.len() < 6 {
        return Err(VenueFetchError::new(
            venue,
            format!("kline row has {} fields, expected at least 6", row.len()),
        ));
    }
    let ts = parse_i64(&row[0])
        .ok_or_else(|| VenueFetchError::new(venue, format!("bad kline timestamp {}", row[0])))?;
    candle_from_fields(venue, ts, [&row[1], &row[2], &row[3], &row[4], &row[5]])
}

/// Sorts a page ascending by timestamp (several venues answer newest-first).
pub fn sort_ascending(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.timestamp);
    candles
}

// =============================================================================
// Client Factory
// =============================================================================

/// Builds one shared client per requested venue, in the order given.
pub fn build_clients(venues: &[Venue], policy: &RetryPolicy) -> Vec<SharedVenueClient> {
    venues
        .iter()
        .map(|venue| -> SharedVenueClient {
            match venue {
                Venue::Binance => Arc::new(BinanceClient::new(policy.clone())),
                Venue::Coinbase => Arc::new(CoinbaseClient::new(policy.clone())),
                Venue::Bybit => Arc::new(BybitClient::new(policy.clone())),
                Venue::Okx => Arc::new(OkxClient::new(policy.clone())),
                Venue::Upbit => Arc::new(UpbitClient::new(policy.clone())),
            }
        })
        .collect()
}

// =============================================================================
// Tests
// =============================================================================
