// src/analytics/metrics.rs
//
// Per-series return/risk statistics and cross-venue price dispersion.
// Prices are stored as decimals and converted to f64 only here.

use crate::error::InsufficientDataError;
use crate::models::{iso_from_ms, AssetHistory, Candle, Venue, VenueSeries};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Primary venue preference when picking the series that represents an asset.
pub const PRIMARY_VENUE_ORDER: [Venue; 5] = [
    Venue::Binance,
    Venue::Coinbase,
    Venue::Okx,
    Venue::Bybit,
    Venue::Upbit,
];

/// Trading days per year used to annualize daily volatility.
const ANNUALIZATION_DAYS: f64 = 365.0;

// =============================================================================
// Metric Types
// =============================================================================

/// Statistics for one venue's daily series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetrics {
    pub listing_date: String,
    pub last_date: String,
    /// Number of daily candles in the series
    pub days: usize,
    /// last / first - 1
    pub cum_return: f64,
    /// Worst peak-to-trough decline, <= 0
    pub max_drawdown: f64,
    /// Annualized population std-dev of daily log returns
    pub volatility: f64,
}

/// Metrics for one asset, taken from its primary venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetMetrics {
    pub asset: String,
    pub primary_venue: Venue,
    pub median_rel_spread: Option<f64>,
    pub median_abs_spread: Option<f64>,
    #[serde(flatten)]
    pub series: SeriesMetrics,
}

/// One venue's metrics for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct VenueMetricsEntry {
    pub asset: String,
    pub metrics: SeriesMetrics,
}

/// Every venue's series metrics across the run, independent of which venue was
/// primary for each asset.
#[derive(Debug, Clone, Default)]
pub struct VenueMetricsAccumulator {
    entries: BTreeMap<Venue, Vec<VenueMetricsEntry>>,
}

impl VenueMetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, venue: Venue, asset: &str, metrics: SeriesMetrics) {
        self.entries.entry(venue).or_default().push(VenueMetricsEntry {
            asset: asset.to_string(),
            metrics,
        });
    }

    pub fn entries(&self) -> &BTreeMap<Venue, Vec<VenueMetricsEntry>> {
        &self.entries
    }

    pub fn for_venue(&self, venue: Venue) -> &[VenueMetricsEntry] {
        self.entries.get(&venue).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Median with the midpoint rule for even lengths. `None` for no values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation. 0 for an empty slice.
pub fn population_std_dev(values: &[f64]) -> f64 {
    let Some(mu) = mean(values) else {
        return 0.0;
    };
    let variance = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn closes(candles: &[Candle]) -> Result<Vec<f64>, InsufficientDataError> {
    candles
        .iter()
        .map(|c| {
            c.close_f64()
                .ok_or_else(|| InsufficientDataError::BadPrice(c.close.to_string()))
        })
        .collect()
}

/// Computes return/risk statistics for one ascending series.
pub fn compute_series_metrics(candles: &[Candle]) -> Result<SeriesMetrics, InsufficientDataError> {
    if candles.len() < 2 {
        return Err(InsufficientDataError::TooFewCandles(candles.len()));
    }
    let closes = closes(candles)?;
    let (first, last) = (closes[0], closes[closes.len() - 1]);
    if first <= 0.0 || last <= 0.0 {
        return Err(InsufficientDataError::NonPositiveEndpoint);
    }

    let log_returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    let volatility = if log_returns.is_empty() {
        0.0
    } else {
        population_std_dev(&log_returns) * ANNUALIZATION_DAYS.sqrt()
    };

    let mut running_max = first;
    let mut max_drawdown = 0.0f64;
    for &price in &closes {
        running_max = running_max.max(price);
        if running_max > 0.0 {
            max_drawdown = max_drawdown.min(price / running_max - 1.0);
        }
    }

    Ok(SeriesMetrics {
        listing_date: iso_from_ms(candles[0].timestamp),
        last_date: iso_from_ms(candles[candles.len() - 1].timestamp),
        days: candles.len(),
        cum_return: last / first - 1.0,
        max_drawdown,
        volatility,
    })
}

/// Median relative and absolute close spread across venues.
///
/// Only timestamps quoted by at least two venues count. Returns `None` when no
/// timestamp produced a relative spread.
pub fn compute_cross_venue_spread<'a>(
    venues: impl IntoIterator<Item = &'a VenueSeries>,
) -> Option<(f64, f64)> {
    let mut per_timestamp: HashMap<i64, Vec<f64>> = HashMap::new();
    for series in venues {
        for candle in &series.candles {
            if let Some(close) = candle.close_f64() {
                per_timestamp.entry(candle.timestamp).or_default().push(close);
            }
        }
    }

    let mut relative = Vec::new();
    let mut absolute = Vec::new();
    for quotes in per_timestamp.values().filter(|q| q.len() >= 2) {
        let max = quotes.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = quotes.iter().copied().fold(f64::INFINITY, f64::min);
        let mid = (max + min) / 2.0;
        if mid > 0.0 {
            relative.push((max - min) / mid);
        }
        absolute.push(max - min);
    }

    Some((median(&relative)?, median(&absolute)?))
}

/// Picks the primary venue: fixed priority first, then the first venue present.
pub fn primary_venue(history: &AssetHistory) -> Option<Venue> {
    PRIMARY_VENUE_ORDER
        .iter()
        .copied()
        .find(|v| history.venues.contains_key(v))
        .or_else(|| history.venues.keys().next().copied())
}

/// Builds an asset's metrics and records every venue's series metrics into
/// `accumulator`. Fails when the primary venue's series is unusable.
pub fn build_asset_metrics(
    asset: &str,
    history: &AssetHistory,
    accumulator: &mut VenueMetricsAccumulator,
) -> Result<AssetMetrics, InsufficientDataError> {
    let primary = primary_venue(history).ok_or(InsufficientDataError::NoVenues)?;
    let series = compute_series_metrics(&history.venues[&primary].candles)?;

    for (venue, venue_series) in &history.venues {
        if let Ok(metrics) = compute_series_metrics(&venue_series.candles) {
            accumulator.record(*venue, asset, metrics);
        }
    }

    let spread = compute_cross_venue_spread(history.venues.values());
    Ok(AssetMetrics {
        asset: asset.to_string(),
        primary_venue: primary,
        median_rel_spread: spread.map(|(rel, _)| rel),
        median_abs_spread: spread.map(|(_, abs)| abs),
        series,
    })
}

// =============================================================================
// Tests
// =============================================================================
