// src/connectors/bybit.rs
//
// Bybit v5 spot. Klines come back newest-first for an inclusive `[start, end]`
// range, so each cursor page asks for exactly `limit` days after `since`.
// With only `end` the venue answers with the `limit` days up to it, which is
// how full history walks back from the newest page.

use super::pagination::{paginate_cursor, CursorPageSource};
use super::{candle_from_row, sort_ascending, HttpFetcher, RetryPolicy};
use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue, DAY_MS};
use crate::traits::VenueClient;
use async_trait::async_trait;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;

const BYBIT_API_URL: &str = "https://api.bybit.com/v5/market";
const PAGE_LIMIT: usize = 1000;
const MAX_LISTING_PAGES: usize = 100;

/// Envelope shared by every v5 endpoint.
#[derive(Debug, Deserialize)]
struct BybitResponse<T> {
    #[serde(rename = "retCode")]
    ret_code: i64,
    #[serde(rename = "retMsg", default)]
    ret_msg: String,
    result: Option<T>,
}

impl<T> BybitResponse<T> {
    fn into_result(self) -> Result<T, VenueFetchError> {
        if self.ret_code != 0 {
            return Err(VenueFetchError::new(
                Venue::Bybit,
                format!("API error {}: {}", self.ret_code, self.ret_msg),
            ));
        }
        self.result
            .ok_or_else(|| VenueFetchError::new(Venue::Bybit, "response has no result"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentsResult {
    list: Vec<InstrumentInfo>,
    #[serde(default)]
    next_page_cursor: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentInfo {
    symbol: String,
    base_coin: String,
    quote_coin: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<Value>>,
}

pub struct BybitClient {
    http: HttpFetcher,
    base_url: String,
}

impl BybitClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_base_url(BYBIT_API_URL, policy)
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: HttpFetcher::new(Venue::Bybit, policy),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn kline_page(
        &self,
        market: &MarketRef,
        range: &[(&'static str, i64)],
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        let url = format!("{}/kline", self.base_url);
        let mut query = vec![
            ("category", "spot".to_string()),
            ("symbol", market.market_id.clone()),
            ("interval", "D".to_string()),
            ("limit", limit.to_string()),
        ];
        query.extend(range.iter().map(|(key, ts)| (*key, ts.to_string())));

        let response: BybitResponse<KlineResult> = self.http.get_json(&url, &query).await?;
        let rows = response.into_result()?.list;
        let candles = rows
            .iter()
            .map(|row| candle_from_row(Venue::Bybit, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_ascending(candles))
    }
}

#[async_trait]
impl CursorPageSource for BybitClient {
    fn venue(&self) -> Venue {
        Venue::Bybit
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
        let range = match since_ms {
            Some(since) => vec![("start", since), ("end", since + limit as i64 * DAY_MS - 1)],
            None => Vec::new(),
        };
        self.kline_page(market, &range, limit).await
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
        let range: Vec<_> = before_ms.map(|ts| ("end", ts - 1)).into_iter().collect();
        self.kline_page(market, &range, limit).await
    }
}

#[async_trait]
impl VenueClient for BybitClient {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        let url = format!("{}/instruments-info", self.base_url);
        let mut pairs = Vec::new();
        let mut cursor: Option<String> = None;
        let mut page = 0;

        loop {
            page += 1;
            let mut query = vec![("category", "spot".to_string())];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }

            let response: BybitResponse<InstrumentsResult> = self.http.get_json(&url, &query).await?;
            let result = response.into_result()?;

            pairs.extend(
                result
                    .list
                    .into_iter()
                    .filter(|i| i.status == "Trading")
                    .map(|i| MarketRef::new(Venue::Bybit, &i.base_coin, &i.quote_coin, i.symbol)),
            );

            if result.next_page_cursor.is_empty() {
                break;
            }
            cursor = Some(result.next_page_cursor);

            if page >= MAX_LISTING_PAGES {
                warn!("BybitClient: Hit listing page limit, stopping");
                break;
            }
        }

        info!("BybitClient: {} trading spot symbols", pairs.len());
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
