// src/connectors/okx.rs
//
// OKX spot. /history-candles pages with `before` (newer than) and `after`
// (older than) bounds, newest-first, at most 100 rows. Without bounds it
// serves the latest rows, so full history walks `after` back from there.

use super::pagination::{paginate_cursor, CursorPageSource};
use super::{candle_from_row, sort_ascending, HttpFetcher, RetryPolicy};
use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue, DAY_MS};
use crate::traits::VenueClient;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use serde_json::Value;

const OKX_API_URL: &str = "https://www.okx.com/api/v5";
const PAGE_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
struct OkxResponse<T> {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default = "Vec::new")]
    data: Vec<T>,
}

impl<T> OkxResponse<T> {
    fn into_data(self) -> Result<Vec<T>, VenueFetchError> {
        if self.code != "0" {
            return Err(VenueFetchError::new(
                Venue::Okx,
                format!("API error {}: {}", self.code, self.msg),
            ));
        }
        Ok(self.data)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instrument {
    inst_id: String,
    base_ccy: String,
    quote_ccy: String,
    state: String,
}

pub struct OkxClient {
    http: HttpFetcher,
    base_url: String,
}

impl OkxClient {
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_base_url(OKX_API_URL, policy)
    }

    pub fn with_base_url(base_url: &str, policy: RetryPolicy) -> Self {
        Self {
            http: HttpFetcher::new(Venue::Okx, policy),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// One newest-first page inside the exclusive `(before, after)` bounds, ascending.
    async fn history_page(
        &self,
        market: &MarketRef,
        bounds: &[(&'static str, i64)],
        limit: usize,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        let url = format!("{}/market/history-candles", self.base_url);
        let mut query = vec![
            ("instId", market.market_id.clone()),
            ("bar", "1Dutc".to_string()),
            ("limit", limit.to_string()),
        ];
        query.extend(bounds.iter().map(|(key, ts)| (*key, ts.to_string())));

        let response: OkxResponse<Vec<Value>> = self.http.get_json(&url, &query).await?;
        let candles = response
            .into_data()?
            .iter()
            .map(|row| candle_from_row(Venue::Okx, row))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sort_ascending(candles))
    }
}

#[async_trait]
impl CursorPageSource for OkxClient {
    fn venue(&self) -> Venue {
        Venue::Okx
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
        let bounds = match since_ms {
            Some(since) => vec![("before", since - 1), ("after", since + limit as i64 * DAY_MS)],
            None => Vec::new(),
        };
        self.history_page(market, &bounds, limit).await
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
        let bounds: Vec<_> = before_ms.map(|ts| ("after", ts)).into_iter().collect();
        self.history_page(market, &bounds, limit).await
    }
}

#[async_trait]
impl VenueClient for OkxClient {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        let url = format!("{}/public/instruments", self.base_url);
        let query = [("instType", "SPOT".to_string())];
        let response: OkxResponse<Instrument> = self.http.get_json(&url, &query).await?;

        let pairs: Vec<MarketRef> = response
            .into_data()?
            .into_iter()
            .filter(|i| i.state == "live")
            .map(|i| MarketRef::new(Venue::Okx, &i.base_ccy, &i.quote_ccy, i.inst_id))
            .collect();

        info!("OkxClient: {} live spot instruments", pairs.len());
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
