// src/traits.rs

use crate::error::VenueFetchError;
use crate::models::{Candle, MarketRef, Venue};
use async_trait::async_trait;
use std::sync::Arc;

/// Uniform access to one venue's public market data.
///
/// Implementations serialize their own calls and own their retry/backoff state,
/// so one shared client per venue is enough for the whole run.
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Which venue this client talks to.
    fn venue(&self) -> Venue;

    /// Lists every currently tradable spot pair.
    /// An asset missing from this list is a resolver-level condition, not an error here.
    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError>;

    /// Fetches daily candles for `market`, starting at `since_ms` when given
    /// (otherwise from the earliest the venue serves). Ascending, unique timestamps.
    async fn fetch_daily_candles(
        &self,
        market: &MarketRef,
        since_ms: Option<i64>,
    ) -> Result<Vec<Candle>, VenueFetchError>;
}

/// Shared venue client, one per venue per run.
pub type SharedVenueClient = Arc<dyn VenueClient>;
