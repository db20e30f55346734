// src/catalog/mod.rs
//
// Market discovery: per-venue listings of tradable spot pairs and the resolver
// that picks one pair per asset. Listings are fetched fresh on every run since
// venues list and delist pairs continuously.

use crate::error::{NoMarketError, VenueFetchError};
use crate::models::{MarketRef, Venue};
use crate::traits::VenueClient;
use log::info;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

// =============================================================================
// Quote Priorities
// =============================================================================

/// Preferred quote currencies per venue, most preferred first.
pub fn default_quote_priority(venue: Venue) -> &'static [&'static str] {
    match venue {
        Venue::Binance => &["USDT", "FDUSD", "BUSD", "USDC", "BTC", "ETH", "BNB", "TRY"],
        Venue::Bybit => &["USDT", "USDC", "BTC", "ETH"],
        Venue::Okx => &["USDT", "USDC", "BTC", "ETH"],
        Venue::Upbit => &["KRW"],
        Venue::Coinbase => &["USD", "USDC", "USDT", "BTC", "EUR", "GBP"],
    }
}

/// Position of `quote` in `priorities`; quotes not listed sort after every listed one.
fn priority_index<S: AsRef<str>>(priorities: &[S], quote: &str) -> usize {
    priorities
        .iter()
        .position(|p| p.as_ref().eq_ignore_ascii_case(quote))
        .unwrap_or(priorities.len())
}

// =============================================================================
// Venue Catalog
// =============================================================================

/// One venue's tradable pairs, grouped by base asset.
#[derive(Debug, Clone)]
pub struct VenueCatalog {
    venue: Venue,
    by_base: HashMap<String, Vec<MarketRef>>,
    /// Unix timestamp (seconds) of the listing fetch.
    pub last_updated: u64,
}

impl VenueCatalog {
    /// Builds a catalog from raw pairs. Pairs for other venues are ignored.
    pub fn from_pairs(venue: Venue, pairs: impl IntoIterator<Item = MarketRef>) -> Self {
        let mut by_base: HashMap<String, Vec<MarketRef>> = HashMap::new();
        for pair in pairs {
            if pair.venue != venue || pair.base.is_empty() || pair.quote.is_empty() {
                continue;
            }
            by_base.entry(pair.base.to_uppercase()).or_default().push(pair);
        }

        let last_updated = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        Self {
            venue,
            by_base,
            last_updated,
        }
    }

    /// Fetches the listing from the venue.
    pub async fn load(client: &dyn VenueClient) -> Result<Self, VenueFetchError> {
        let venue = client.venue();
        let pairs = client.list_tradable_pairs().await?;
        let catalog = Self::from_pairs(venue, pairs);
        info!(
            "VenueCatalog: {} lists {} pairs across {} base assets (as of {})",
            venue,
            catalog.len(),
            catalog.by_base.len(),
            format_timestamp(catalog.last_updated)
        );
        Ok(catalog)
    }

    pub fn venue(&self) -> Venue {
        self.venue
    }

    /// All pairs quoting `base`, in listing order.
    pub fn candidates(&self, base: &str) -> &[MarketRef] {
        self.by_base
            .get(&base.to_uppercase())
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Number of pairs in the catalog.
    pub fn len(&self) -> usize {
        self.by_base.values().map(|v| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_base.is_empty()
    }
}

// =============================================================================
// Market Resolver
// =============================================================================

/// Picks the single best pair for an asset on a venue.
///
/// Lowest quote priority index wins; unlisted quotes sort last; ties go to the
/// lexicographically smallest symbol. The choice only depends on the listing
/// contents, never on listing order.
#[derive(Debug, Clone, Default)]
pub struct MarketResolver {
    overrides: HashMap<Venue, Vec<String>>,
}

impl MarketResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the quote priority list for one venue.
    pub fn with_priorities(mut self, venue: Venue, priorities: Vec<String>) -> Self {
        self.overrides.insert(venue, priorities);
        self
    }

    fn compare(&self, venue: Venue, a: &MarketRef, b: &MarketRef) -> Ordering {
        let (ia, ib) = match self.overrides.get(&venue) {
            Some(list) => (priority_index(list, &a.quote), priority_index(list, &b.quote)),
            None => {
                let list = default_quote_priority(venue);
                (priority_index(list, &a.quote), priority_index(list, &b.quote))
            }
        };
        ia.cmp(&ib).then_with(|| a.symbol.cmp(&b.symbol))
    }

    /// Resolves `asset` against a venue catalog.
    pub fn resolve(&self, asset: &str, catalog: &VenueCatalog) -> Result<MarketRef, NoMarketError> {
        self.resolve_in(asset, catalog.venue(), catalog.candidates(asset))
    }

    /// Resolves `asset` against an arbitrary slice of pairs.
    pub fn resolve_in(
        &self,
        asset: &str,
        venue: Venue,
        pairs: &[MarketRef],
    ) -> Result<MarketRef, NoMarketError> {
        pairs
            .iter()
            .filter(|p| p.base.eq_ignore_ascii_case(asset))
            .min_by(|a, b| self.compare(venue, a, b))
            .cloned()
            .ok_or_else(|| NoMarketError {
                venue,
                asset: asset.to_uppercase(),
            })
    }
}

// =============================================================================
// Utility Functions
// =============================================================================

/// Format a Unix timestamp for logging.
pub fn format_timestamp(ts: u64) -> String {
    if ts == 0 {
        return "never".to_string();
    }
    chrono::DateTime::from_timestamp(ts as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("unix:{}", ts))
}

// =============================================================================
// Tests
// =============================================================================
