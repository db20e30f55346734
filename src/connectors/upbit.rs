// src/connectors/upbit.rs
//
// Upbit. /candles/days returns up to 200 candles strictly before `to`,
// newest-first, and the latest 200 without `to`. A page for `since` asks for
// the 200 days that follow it; full history walks `to` back from the newest.

use super::pagination::{paginate_cursor, CursorPageSource};
use super::{candle_from_fields, sort_ascending, HttpFetcher, RetryPolicy};
use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue, DAY_MS};
use crate::traits::VenueClient;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use log::info;
use serde::Deserialize;
use serde_json::Value;

const UPBIT_API_URL: &str = "https://api.upbit.com/v1";
const PAGE_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct UpbitMarket {
    /// "QUOTE-BASE", e.g. "KRW-BTC"
    market: String,
}

#[derive(Debug, Deserialize)]
struct UpbitDayCandle {
    /// Candle start, UTC, without offset: "2024-01-01T00:00:00"
    candle_date_time_utc: String,
    opening_price: Value,
    high_price: Value,
    low_price: Value,
    trade_price: Value,
    candle_acc_trade_volume: Value,
}

impl UpbitDayCandle {
    fn into_candle(self) -> Result<Candle, VenueFetchError> {
        let ts = NaiveDateTime::parse_from_str(&self.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| {
                VenueFetchError::new(
                    Venue::Upbit,
                    format!("bad candle time '{}': {}", self.candle_date_time_utc, e),
                )
            })?
            .and_utc()
            .timestamp_millis();
        candle_from_fields(
            Venue::Upbit,
            ts,
            [
                &self.opening_price,
                &self.high_price,
                &self.low_price,
                &self.trade_price,
                &self.candle_acc_trade_volume,
            ],
        )
    }
}

/// Splits an Upbit market id into `(base, quote)`.
fn split_market(market: &str) -> Option<(&str, &str)> {
    let (quote, base) = market.split_once('-')?;
    if quote.is_empty() || base.is_empty() {
        return None;
    }
    Some((base, quote))
}

pub struct UpbitClient {
    http: HttpFetcher,
    base_url: String,
}

impl UpbitClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_base_url(UPBIT_API_URL, policy)
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: HttpFetcher::new(Venue::Upbit, policy),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Up to `limit` days strictly before `to_ms` (latest when `None`), ascending.
    async fn candles_before(
        &self,
        market: &MarketRef,
        to_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        let url = format!("{}/candles/days", self.base_url);
        let mut query = vec![
            ("market", market.market_id.clone()),
            ("count", limit.to_string()),
        ];
        if let Some(to) = to_ms.and_then(DateTime::<Utc>::from_timestamp_millis) {
            query.push(("to", to.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }

        let rows: Vec<UpbitDayCandle> = self.http.get_json(&url, &query).await?;
        let candles = rows
            .into_iter()
            .map(UpbitDayCandle::into_candle)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_ascending(candles))
    }
}

#[async_trait]
impl CursorPageSource for UpbitClient {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    fn page_limit(&self) -> usize {
        PAGE_LIMIT
    }

    async fn fetch_page(
        &self,
        market: &MarketRef,
        since_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        let to_ms = since_ms.map(|since| since + limit as i64 * DAY_MS);
        self.candles_before(market, to_ms, limit).await
    }

    fn walks_backward(&self) -> bool {
        true
    }

    async fn fetch_page_before(
        &self,
        market: &MarketRef,
        before_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        self.candles_before(market, before_ms, limit).await
    }
}

#[async_trait]
impl VenueClient for UpbitClient {
    fn venue(&self) -> Venue {
        Venue::Upbit
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        let url = format!("{}/market/all", self.base_url);
        let markets: Vec<UpbitMarket> = self.http.get_json(&url, &[]).await?;

        let pairs: Vec<MarketRef> = markets
            .iter()
            .filter_map(|m| {
                let (base, quote) = split_market(&m.market)?;
                Some(MarketRef::new(Venue::Upbit, base, quote, m.market.clone()))
            })
            .collect();

        info!("UpbitClient: {} markets", pairs.len());
        Ok(pairs)
    }

    async fn fetch_daily_candles(
        &self,
        market: &MarketRef,
        since_ms: Option<i64>,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        paginate_cursor(self, market, since_ms).await
    }
}
