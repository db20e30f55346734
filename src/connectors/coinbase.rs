// src/connectors/coinbase.rs
//
// Coinbase Exchange public REST. Candles are served per explicit date window
// (max 300 rows), so this venue uses the date-window pagination family.
// Row layout: [time_secs, low, high, open, close, volume].

use super::pagination::{paginate_windows, WindowPageSource};
use super::{candle_from_fields, parse_i64, HttpFetcher, RetryPolicy};
use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue};
use crate::traits::VenueClient;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use log::info;
use serde::Deserialize;
use serde_json::Value;

const COINBASE_API_URL: &str = "https://api.exchange.coinbase.com";
const WINDOW_DAYS: i64 = 300;
const GRANULARITY_SECS: u32 = 86_400;

#[derive(Debug, Deserialize)]
struct Product {
    id: String,
    base_currency: String,
    quote_currency: String,
    status: String,
}

pub struct CoinbaseClient {
    http: HttpFetcher,
    base_url: String,
}

impl CoinbaseClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_base_url(COINBASE_API_URL, policy)
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: HttpFetcher::new(Venue::Coinbase, policy),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

fn candle_from_coinbase_row(row: &[Value]) -> Result<Candle, VenueFetchError> {
    if row.len() < 6 {
        return Err(VenueFetchError::new(
            Venue::Coinbase,
            format!("candle row has {} fields, expected 6", row.len()),
        ));
    }
    let ts_secs = parse_i64(&row[0]).ok_or_else(|| {
        VenueFetchError::new(Venue::Coinbase, format!("bad candle time {}", row[0]))
    })?;
    // low, high, open, close, volume -> open, high, low, close, volume
    candle_from_fields(
        Venue::Coinbase,
        ts_secs * 1000,
        [&row[3], &row[2], &row[1], &row[4], &row[5]],
    )
}

#[async_trait]
impl WindowPageSource for CoinbaseClient {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    fn window(&self) -> Duration {
        Duration::days(WINDOW_DAYS)
    }

    fn earliest_start(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2015, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_default()
    }

    async fn fetch_window(
        &self,
        market: &MarketRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        let url = format!("{}/products/{}/candles", self.base_url, market.market_id);
        let query = [
            ("granularity", GRANULARITY_SECS.to_string()),
            ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
        ];
        let rows: Vec<Vec<Value>> = self.http.get_json(&url, &query).await?;
        rows.iter().map(|row| candle_from_coinbase_row(row)).collect()
    }
}

#[async_trait]
impl VenueClient for CoinbaseClient {
    fn venue(&self) -> Venue {
        Venue::Coinbase
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        let url = format!("{}/products", self.base_url);
        let products: Vec<Product> = self.http.get_json(&url, &[]).await?;

        let pairs: Vec<MarketRef> = products
            .into_iter()
            .filter(|p| p.status == "online")
            .map(|p| MarketRef::new(Venue::Coinbase, &p.base_currency, &p.quote_currency, p.id))
            .collect();

        info!("CoinbaseClient: {} online products", pairs.len());
        Ok(pairs)
    }

    async fn fetch_daily_candles(
        &self,
        market: &MarketRef,
        since_ms: Option<i64>,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        paginate_windows(self, market, since_ms, Utc::now()).await
    }
}
