// src/harvest/mod.rs
//
// Incremental multi-venue collection for one asset at a time.
//
// Every (asset, venue) pair ends in exactly one `VenueOutcome`. Outcomes are
// folded into the stored record by `AssetHarvest::compose`, which is the only
// place a stored series can change.

use crate::catalog::{MarketResolver, VenueCatalog};
use crate::error::{NoMarketError, VenueFetchError};
use crate::models::{iso_from_ms, AssetHistory, Candle, Venue, VenueSeries, DAY_MS};
use crate::traits::{SharedVenueClient, VenueClient};
use futures::future::join_all;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Merge
// =============================================================================

/// Union of two series keyed by timestamp; `new` wins on collision. Ascending.
pub fn merge_candles(existing: &[Candle], new: Vec<Candle>) -> Vec<Candle> {
    let mut by_ts: BTreeMap<i64, Candle> = existing
        .iter()
        .map(|c| (c.timestamp, c.clone()))
        .collect();
    for candle in new {
        by_ts.insert(candle.timestamp, candle);
    }
    by_ts.into_values().collect()
}

// =============================================================================
// Outcomes
// =============================================================================

/// Why a venue contributed nothing for an asset.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoMarket(NoMarketError),
    /// Fetch failed and there was nothing stored to fall back on.
    FetchFailed(VenueFetchError),
    /// The venue answered but had no candles.
    NoData,
}

/// Terminal state of one (asset, venue) harvest.
#[derive(Debug, Clone, PartialEq)]
pub enum VenueOutcome {
    /// Merged series differs from what was stored.
    Updated(VenueSeries),
    /// Fetch succeeded; merged series equals the stored one.
    Unchanged,
    /// Fetch failed; the stored series is kept untouched.
    Retained(VenueFetchError),
    Skipped(SkipReason),
}

impl VenueOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            VenueOutcome::Updated(_) => "updated",
            VenueOutcome::Unchanged => "unchanged",
            VenueOutcome::Retained(_) => "retained",
            VenueOutcome::Skipped(_) => "skipped",
        }
    }
}

/// All venue outcomes for one asset.
#[derive(Debug, Clone)]
pub struct AssetHarvest {
    pub asset: String,
    pub outcomes: BTreeMap<Venue, VenueOutcome>,
}

impl AssetHarvest {
    pub fn updated_count(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| matches!(o, VenueOutcome::Updated(_)))
            .count()
    }

    /// Folds the outcomes into the stored record.
    ///
    /// Venues without an `Updated` outcome keep whatever was stored for them,
    /// including venues that were not part of this run. Returns `None` when no
    /// venue was updated, in which case the stored record (if any) must be
    /// left alone.
    pub fn compose(self, existing: Option<AssetHistory>) -> Option<AssetHistory> {
        if self.updated_count() == 0 {
            return None;
        }

        let mut venues = existing.map(|h| h.venues).unwrap_or_default();
        for (venue, outcome) in self.outcomes {
            if let VenueOutcome::Updated(series) = outcome {
                if series.is_empty() {
                    venues.remove(&venue);
                } else {
                    venues.insert(venue, series);
                }
            }
        }

        if venues.is_empty() {
            return None;
        }
        Some(AssetHistory::new(self.asset, venues))
    }
}

// =============================================================================
// Harvester
// =============================================================================

/// Runs per-venue harvests against catalogs loaded once per run.
pub struct HistoryHarvester {
    clients: Vec<SharedVenueClient>,
    catalogs: HashMap<Venue, Result<VenueCatalog, VenueFetchError>>,
    resolver: MarketResolver,
}

impl HistoryHarvester {
    /// Loads every venue's listing concurrently. A listing failure is kept and
    /// reported as a fetch failure for each asset on that venue.
    pub async fn prepare(clients: Vec<SharedVenueClient>, resolver: MarketResolver) -> Self {
        let loads = clients.iter().map(|client| async move {
            let venue = client.venue();
            let catalog = VenueCatalog::load(client.as_ref()).await;
            if let Err(e) = &catalog {
                warn!("Harvester: catalog unavailable for {}: {}", venue, e);
            }
            (venue, catalog)
        });
        let catalogs = join_all(loads).await.into_iter().collect();

        Self {
            clients,
            catalogs,
            resolver,
        }
    }

    pub fn venues(&self) -> Vec<Venue> {
        self.clients.iter().map(|c| c.venue()).collect()
    }

    /// Harvests every configured venue for `asset`, venues in parallel.
    pub async fn harvest_asset(
        &self,
        asset: &str,
        existing: Option<&AssetHistory>,
        incremental: bool,
    ) -> AssetHarvest {
        let asset = asset.to_uppercase();
        let runs = self.clients.iter().map(|client| {
            let stored = existing.and_then(|h| h.venues.get(&client.venue()));
            let asset = asset.as_str();
            async move {
                let outcome = self
                    .harvest_venue(client.as_ref(), asset, stored, incremental)
                    .await;
                (client.venue(), outcome)
            }
        });
        let outcomes: BTreeMap<Venue, VenueOutcome> = join_all(runs).await.into_iter().collect();

        AssetHarvest { asset, outcomes }
    }

    async fn harvest_venue(
        &self,
        client: &dyn VenueClient,
        asset: &str,
        stored: Option<&VenueSeries>,
        incremental: bool,
    ) -> VenueOutcome {
        let venue = client.venue();
        let stored = stored.filter(|s| !s.is_empty());
        let fall_back = |err: VenueFetchError| match stored {
            Some(_) => {
                warn!("Harvester: {} {}: {}; keeping stored series", asset, venue, err);
                VenueOutcome::Retained(err)
            }
            None => {
                warn!("Harvester: {} {}: {}; skipping", asset, venue, err);
                VenueOutcome::Skipped(SkipReason::FetchFailed(err))
            }
        };

        let catalog = match self.catalogs.get(&venue) {
            Some(Ok(catalog)) => catalog,
            Some(Err(e)) => return fall_back(e.clone()),
            None => return fall_back(VenueFetchError::new(venue, "catalog was never loaded")),
        };

        let market = match self.resolver.resolve(asset, catalog) {
            Ok(m) => m,
            Err(e) => {
                debug!("Harvester: {}", e);
                return VenueOutcome::Skipped(SkipReason::NoMarket(e));
            }
        };

        // A different resolved pair means a different quote currency; the
        // stored series cannot be extended with it.
        let base = stored.filter(|s| s.market == market.symbol);
        if let (Some(s), None) = (stored, base) {
            warn!(
                "Harvester: {} {} market changed {} -> {}, refetching full history",
                asset, venue, s.market, market.symbol
            );
        }

        let since = if incremental {
            base.and_then(|s| s.last_timestamp()).map(|ts| ts + DAY_MS)
        } else {
            None
        };
        match since {
            Some(ts) => info!("Harvester: {} {} fetching since {}", asset, market, iso_from_ms(ts)),
            None => info!("Harvester: {} {} fetching full history", asset, market),
        }

        let fetched = match client.fetch_daily_candles(&market, since).await {
            Ok(c) => c,
            Err(e) => return fall_back(e),
        };

        let previous: &[Candle] = base.map(|s| s.candles.as_slice()).unwrap_or(&[]);
        let merged = merge_candles(previous, fetched);

        if merged.is_empty() {
            return VenueOutcome::Skipped(SkipReason::NoData);
        }
        if base.is_some() && merged.as_slice() == previous {
            debug!("Harvester: {} {} already up to date", asset, venue);
            return VenueOutcome::Unchanged;
        }

        info!(
            "Harvester: {} {} -> {} candles ({} new)",
            asset,
            market,
            merged.len(),
            merged.len().saturating_sub(previous.len())
        );
        VenueOutcome::Updated(VenueSeries::new(&market, merged))
    }
}

// =============================================================================
// Tests
// =============================================================================
