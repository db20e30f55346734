// src/connectors/binance.rs
//
// Binance spot: cursor pagination via `startTime` + `limit` on /klines.
// `startTime=0` walks forward from the listing date.

use super::pagination::{paginate_cursor, CursorPageSource};
use super::{candle_from_row, HttpFetcher, RetryPolicy};
use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue};
use crate::traits::VenueClient;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::Value;

/// Public data mirror, reachable from most regions.
const BINANCE_API_URL: &str = "https://data-api.binance.vision/api/v3";
const PAGE_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolInfo {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default = "default_true")]
    is_spot_trading_allowed: bool,
}

fn default_true() -> bool {
    true
}

pub struct BinanceClient {
    http: HttpFetcher,
    base_url: String,
}

impl BinanceClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_base_url(BINANCE_API_URL, policy)
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: HttpFetcher::new(Venue::Binance, policy),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl CursorPageSource for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
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
        let url = format!("{}/klines", self.base_url);
        let query = [
            ("symbol", market.market_id.clone()),
            ("interval", "1d".to_string()),
            ("limit", limit.to_string()),
            ("startTime", since_ms.unwrap_or(0).to_string()),
        ];
        let rows: Vec<Vec<Value>> = self.http.get_json(&url, &query).await?;
        rows.iter()
            .map(|row| candle_from_row(Venue::Binance, row))
            .collect()
    }
}

#[async_trait]
impl VenueClient for BinanceClient {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        let url = format!("{}/exchangeInfo", self.base_url);
        let info: ExchangeInfo = self.http.get_json(&url, &[]).await?;

        let pairs: Vec<MarketRef> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING" && s.is_spot_trading_allowed)
            .map(|s| MarketRef::new(Venue::Binance, &s.base_asset, &s.quote_asset, s.symbol))
            .collect();

        info!("BinanceClient: {} trading spot symbols", pairs.len());
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
