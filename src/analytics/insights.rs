// src/analytics/insights.rs
//
// Folds per-asset metrics into the global insights report: medians, rankings,
// per-venue summaries and distributions. Pure; no I/O.

use super::metrics::{mean, median, AssetMetrics, VenueMetricsAccumulator};
use crate::error::RunError;
use crate::models::Venue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Report shaping knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InsightsOptions {
    /// Entries in each of the gainers/decliners rankings
    pub top_movers: usize,
    /// Entries in the widest-spread ranking
    pub top_spreads: usize,
    /// Cap on the spread distribution; `None` keeps every asset
    pub spread_distribution_limit: Option<usize>,
}

impl Default for InsightsOptions {
    fn default() -> Self {
        Self {
            top_movers: 5,
            top_spreads: 10,
            spread_distribution_limit: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsSummary {
    pub assets: usize,
    pub median_cum_return: f64,
    pub median_drawdown: f64,
    pub median_volatility: f64,
    /// Over assets with a cross-venue spread only; null when none has one
    pub median_spread: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueSummary {
    pub count: usize,
    pub avg_cum_return: f64,
    pub median_drawdown: f64,
    pub median_volatility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnPoint {
    pub asset: String,
    pub cum_return: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpreadPoint {
    pub asset: String,
    pub median_rel_spread: f64,
}

/// The run's full analytics output. Regenerated wholesale every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightsReport {
    pub generated_at: DateTime<Utc>,
    pub assets_processed: usize,
    pub asset_metrics: BTreeMap<String, AssetMetrics>,
    pub summary: InsightsSummary,
    pub top_gainers: Vec<AssetMetrics>,
    pub top_decliners: Vec<AssetMetrics>,
    pub top_spreads: Vec<AssetMetrics>,
    pub venue_summary: BTreeMap<Venue, VenueSummary>,
    pub return_distribution: Vec<ReturnPoint>,
    pub spread_distribution: Vec<SpreadPoint>,
}

fn by_value_then_asset(a: (f64, &str), b: (f64, &str)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1))
}

fn ranked(
    metrics: &[AssetMetrics],
    key: impl Fn(&AssetMetrics) -> Option<f64>,
    descending: bool,
    limit: usize,
) -> Vec<AssetMetrics> {
    let mut keyed: Vec<(f64, &AssetMetrics)> =
        metrics.iter().filter_map(|m| key(m).map(|k| (k, m))).collect();
    keyed.sort_by(|a, b| {
        let (ka, kb) = if descending { (b.0, a.0) } else { (a.0, b.0) };
        // Ties always go to the smaller ticker first.
        ka.total_cmp(&kb).then_with(|| a.1.asset.cmp(&b.1.asset))
    });
    keyed.into_iter().take(limit).map(|(_, m)| m.clone()).collect()
}

fn summarize_venues(accumulator: &VenueMetricsAccumulator) -> BTreeMap<Venue, VenueSummary> {
    let mut out = BTreeMap::new();
    for (venue, entries) in accumulator.entries() {
        let returns: Vec<f64> = entries.iter().map(|e| e.metrics.cum_return).collect();
        let drawdowns: Vec<f64> = entries.iter().map(|e| e.metrics.max_drawdown).collect();
        let vols: Vec<f64> = entries.iter().map(|e| e.metrics.volatility).collect();

        if let (Some(avg), Some(dd), Some(vol)) = (mean(&returns), median(&drawdowns), median(&vols)) {
            out.insert(
                *venue,
                VenueSummary {
                    count: entries.len(),
                    avg_cum_return: avg,
                    median_drawdown: dd,
                    median_volatility: vol,
                },
            );
        }
    }
    out
}

/// Builds the report. Fails only when there are no asset metrics at all.
pub fn build_report(
    metrics: Vec<AssetMetrics>,
    accumulator: &VenueMetricsAccumulator,
    options: &InsightsOptions,
) -> Result<InsightsReport, RunError> {
    let returns: Vec<f64> = metrics.iter().map(|m| m.series.cum_return).collect();
    let drawdowns: Vec<f64> = metrics.iter().map(|m| m.series.max_drawdown).collect();
    let vols: Vec<f64> = metrics.iter().map(|m| m.series.volatility).collect();
    let spreads: Vec<f64> = metrics.iter().filter_map(|m| m.median_rel_spread).collect();

    let (Some(median_cum_return), Some(median_drawdown), Some(median_volatility)) =
        (median(&returns), median(&drawdowns), median(&vols))
    else {
        return Err(RunError::NoUsableData);
    };

    let summary = InsightsSummary {
        assets: metrics.len(),
        median_cum_return,
        median_drawdown,
        median_volatility,
        median_spread: median(&spreads),
    };

    let top_gainers = ranked(&metrics, |m| Some(m.series.cum_return), true, options.top_movers);
    let top_decliners = ranked(&metrics, |m| Some(m.series.cum_return), false, options.top_movers);
    let top_spreads = ranked(&metrics, |m| m.median_rel_spread, true, options.top_spreads);

    let mut return_distribution: Vec<ReturnPoint> = metrics
        .iter()
        .map(|m| ReturnPoint {
            asset: m.asset.clone(),
            cum_return: m.series.cum_return,
        })
        .collect();
    return_distribution.sort_by(|a, b| {
        by_value_then_asset((a.cum_return, a.asset.as_str()), (b.cum_return, b.asset.as_str()))
    });

    let mut spread_distribution: Vec<SpreadPoint> = metrics
        .iter()
        .filter_map(|m| {
            m.median_rel_spread.map(|s| SpreadPoint {
                asset: m.asset.clone(),
                median_rel_spread: s,
            })
        })
        .collect();
    spread_distribution.sort_by(|a, b| {
        by_value_then_asset(
            (a.median_rel_spread, a.asset.as_str()),
            (b.median_rel_spread, b.asset.as_str()),
        )
    });
    if let Some(limit) = options.spread_distribution_limit {
        spread_distribution.truncate(limit);
    }

    let assets_processed = metrics.len();
    let asset_metrics = metrics.into_iter().map(|m| (m.asset.clone(), m)).collect();

    Ok(InsightsReport {
        generated_at: Utc::now(),
        assets_processed,
        asset_metrics,
        summary,
        top_gainers,
        top_decliners,
        top_spreads,
        venue_summary: summarize_venues(accumulator),
        return_distribution,
        spread_distribution,
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::metrics::SeriesMetrics;

    fn series(cum_return: f64, max_drawdown: f64, volatility: f64) -> SeriesMetrics {
        SeriesMetrics {
            listing_date: "2024-01-01T00:00:00Z".to_string(),
            last_date: "2024-02-01T00:00:00Z".to_string(),
            days: 32,
            cum_return,
            max_drawdown,
            volatility,
        }
    }

    fn asset(name: &str, cum_return: f64, spread: Option<f64>) -> AssetMetrics {
        AssetMetrics {
            asset: name.to_string(),
            primary_venue: Venue::Binance,
            median_rel_spread: spread,
            median_abs_spread: spread.map(|s| s * 100.0),
            series: series(cum_return, -0.2, 0.8),
        }
    }

    #[test]
    fn test_empty_metrics_is_no_usable_data() {
        let acc = VenueMetricsAccumulator::new();
        let result = build_report(Vec::new(), &acc, &InsightsOptions::default());
        assert!(matches!(result, Err(RunError::NoUsableData)));
    }

    #[test]
    fn test_single_venue_asset_excluded_from_spread_median_only() {
        let metrics = vec![
            asset("AAA", 1.0, Some(0.01)),
            asset("BBB", 0.0, Some(0.03)),
            asset("SOLO", 3.0, None),
        ];
        let acc = VenueMetricsAccumulator::new();
        let report = build_report(metrics, &acc, &InsightsOptions::default()).unwrap();

        assert_eq!(report.summary.assets, 3);
        assert_eq!(report.summary.median_cum_return, 1.0);
        assert!((report.summary.median_spread.unwrap() - 0.02).abs() < 1e-12);
        assert_eq!(report.spread_distribution.len(), 2);
        assert_eq!(report.return_distribution.len(), 3);
        assert!(report.top_spreads.iter().all(|m| m.asset != "SOLO"));
    }

    #[test]
    fn test_rankings_and_tie_break() {
        let metrics = vec![
            asset("ZZZ", 0.5, None),
            asset("AAA", 0.5, None),
            asset("DOWN", -0.9, None),
            asset("UP", 4.0, None),
        ];
        let acc = VenueMetricsAccumulator::new();
        let options = InsightsOptions {
            top_movers: 3,
            ..InsightsOptions::default()
        };
        let report = build_report(metrics, &acc, &options).unwrap();

        let gainers: Vec<&str> = report.top_gainers.iter().map(|m| m.asset.as_str()).collect();
        assert_eq!(gainers, vec!["UP", "AAA", "ZZZ"]);
        let decliners: Vec<&str> = report.top_decliners.iter().map(|m| m.asset.as_str()).collect();
        assert_eq!(decliners, vec!["DOWN", "AAA", "ZZZ"]);

        let dist: Vec<&str> = report.return_distribution.iter().map(|p| p.asset.as_str()).collect();
        assert_eq!(dist, vec!["DOWN", "AAA", "ZZZ", "UP"]);
        assert!(report.summary.median_spread.is_none());
    }

    #[test]
    fn test_spread_distribution_ascending_with_limit() {
        let metrics = vec![
            asset("A", 0.0, Some(0.05)),
            asset("B", 0.0, Some(0.01)),
            asset("C", 0.0, Some(0.03)),
        ];
        let acc = VenueMetricsAccumulator::new();
        let options = InsightsOptions {
            spread_distribution_limit: Some(2),
            ..InsightsOptions::default()
        };
        let report = build_report(metrics, &acc, &options).unwrap();

        let spreads: Vec<&str> = report.spread_distribution.iter().map(|p| p.asset.as_str()).collect();
        assert_eq!(spreads, vec!["B", "C"]);
        // Rankings are unaffected by the distribution cap.
        assert_eq!(report.top_spreads[0].asset, "A");
        assert_eq!(report.top_spreads.len(), 3);
    }

    #[test]
    fn test_venue_summary() {
        let mut acc = VenueMetricsAccumulator::new();
        acc.record(Venue::Okx, "A", series(1.0, -0.5, 0.4));
        acc.record(Venue::Okx, "B", series(0.0, -0.1, 0.6));
        acc.record(Venue::Okx, "C", series(2.0, -0.3, 0.9));
        acc.record(Venue::Upbit, "A", series(0.5, -0.2, 1.0));

        let report = build_report(vec![asset("A", 1.0, None)], &acc, &InsightsOptions::default()).unwrap();
        let okx = &report.venue_summary[&Venue::Okx];
        assert_eq!(okx.count, 3);
        assert!((okx.avg_cum_return - 1.0).abs() < 1e-12);
        assert_eq!(okx.median_drawdown, -0.3);
        assert_eq!(okx.median_volatility, 0.6);
        assert_eq!(report.venue_summary[&Venue::Upbit].count, 1);
        assert!(!report.venue_summary.contains_key(&Venue::Binance));
    }
}
