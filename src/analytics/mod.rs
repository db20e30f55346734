// src/analytics/mod.rs
//
// Quant metrics over harvested histories.

pub mod insights;
pub mod metrics;

pub use insights::{build_report, InsightsOptions, InsightsReport};
pub use metrics::{
    build_asset_metrics, compute_cross_venue_spread, compute_series_metrics, AssetMetrics,
    SeriesMetrics, VenueMetricsAccumulator,
};
