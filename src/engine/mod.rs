// src/engine/mod.rs
//
// Run orchestration. The harvest run drives a bounded pool of asset workers
// over one shared harvester; the insights run folds stored records into the
// analytics report.

use crate::analytics::{
    build_asset_metrics, build_report, InsightsOptions, InsightsReport, VenueMetricsAccumulator,
};
use crate::error::RunError;
use crate::harvest::HistoryHarvester;
use crate::models::Venue;
use crate::store::{write_atomic, HistoryStore};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// Harvest Run
// =============================================================================

/// Knobs for one harvest run.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    /// Concurrent asset workers
    pub workers: usize,
    /// Fetch only candles newer than the stored ones
    pub incremental: bool,
    /// Leave assets that already have a record alone
    pub skip_existing: bool,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            incremental: true,
            skip_existing: false,
        }
    }
}

/// What happened to one asset.
#[derive(Debug, Clone, PartialEq)]
pub enum AssetStatus {
    /// Record rewritten
    Written { venues: usize, candles: usize },
    /// Nothing new; the stored record was left alone
    Kept,
    /// Record exists and `skip_existing` is set
    SkippedExisting,
    /// No venue produced data and nothing was stored
    NoData,
    /// Reading or writing the record failed
    Failed(String),
    /// Stop was requested before the asset started
    Stopped,
}

/// Totals for a harvest run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HarvestSummary {
    pub assets: usize,
    pub written: usize,
    pub kept: usize,
    pub skipped_existing: usize,
    pub no_data: usize,
    pub failed: usize,
    pub stopped: usize,
    /// Per-venue outcome label counts, e.g. `"binance" -> {"updated": 12}`
    pub venue_outcomes: BTreeMap<Venue, BTreeMap<&'static str, usize>>,
}

impl HarvestSummary {
    /// Assets that have a usable record after the run.
    pub fn usable(&self) -> usize {
        self.written + self.kept + self.skipped_existing
    }

    fn count(&mut self, status: &AssetStatus) {
        match status {
            AssetStatus::Written { .. } => self.written += 1,
            AssetStatus::Kept => self.kept += 1,
            AssetStatus::SkippedExisting => self.skipped_existing += 1,
            AssetStatus::NoData => self.no_data += 1,
            AssetStatus::Failed(_) => self.failed += 1,
            AssetStatus::Stopped => self.stopped += 1,
        }
    }
}

/// Harvests a list of assets into a `HistoryStore`.
pub struct HarvestRunner {
    harvester: Arc<HistoryHarvester>,
    store: HistoryStore,
    settings: HarvestSettings,
    stop: Arc<AtomicBool>,
}

impl HarvestRunner {
    pub fn new(harvester: HistoryHarvester, store: HistoryStore, settings: HarvestSettings) -> Self {
        Self {
            harvester: Arc::new(harvester),
            store,
            settings,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that makes the run stop picking up new assets once set.
    /// Assets already in flight finish and are written normally.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Runs every asset through the worker pool. Assets are expected to be
    /// de-duplicated already; duplicates are dropped here as well so no two
    /// workers ever hold the same record.
    pub async fn run(&self, assets: Vec<String>) -> Result<HarvestSummary, RunError> {
        let mut seen = HashSet::new();
        let assets: Vec<String> = assets
            .into_iter()
            .map(|a| a.to_uppercase())
            .filter(|a| seen.insert(a.clone()))
            .collect();

        let total = assets.len();
        let workers = self.settings.workers.max(1);
        info!(
            "HarvestRunner: {} assets, {} workers, venues [{}], {} mode",
            total,
            workers,
            self.harvester
                .venues()
                .iter()
                .map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            if self.settings.incremental { "incremental" } else { "full-refresh" }
        );

        let results: Vec<(AssetStatus, BTreeMap<Venue, &'static str>)> = stream::iter(
            assets.iter().enumerate(),
        )
        .map(|(i, asset)| self.process_asset(asset, i + 1, total))
        .buffer_unordered(workers)
        .collect()
        .await;

        let mut summary = HarvestSummary {
            assets: total,
            ..HarvestSummary::default()
        };
        for (status, outcomes) in &results {
            summary.count(status);
            for (venue, label) in outcomes {
                *summary
                    .venue_outcomes
                    .entry(*venue)
                    .or_default()
                    .entry(*label)
                    .or_default() += 1;
            }
        }

        info!(
            "HarvestRunner: done. written={} kept={} skipped_existing={} no_data={} failed={} stopped={}",
            summary.written,
            summary.kept,
            summary.skipped_existing,
            summary.no_data,
            summary.failed,
            summary.stopped
        );
        for (venue, counts) in &summary.venue_outcomes {
            info!("HarvestRunner: {} {:?}", venue, counts);
        }

        if summary.usable() == 0 && summary.stopped < total {
            return Err(RunError::NoUsableData);
        }
        Ok(summary)
    }

    async fn process_asset(
        &self,
        asset: &str,
        index: usize,
        total: usize,
    ) -> (AssetStatus, BTreeMap<Venue, &'static str>) {
        if self.stop.load(Ordering::SeqCst) {
            debug!("HarvestRunner: stop requested, not starting {}", asset);
            return (AssetStatus::Stopped, BTreeMap::new());
        }
        if self.settings.skip_existing && self.store.exists(asset) {
            info!("Skipping {} ({}/{}): record exists", asset, index, total);
            return (AssetStatus::SkippedExisting, BTreeMap::new());
        }

        info!("Processing {} ({}/{})", asset, index, total);

        let existing = match self.store.load_or_absent(asset) {
            Ok(e) => e,
            Err(e) => {
                error!("HarvestRunner: {}: {}", asset, e);
                return (AssetStatus::Failed(e.to_string()), BTreeMap::new());
            }
        };
        let had_record = existing.is_some();

        let harvest = self
            .harvester
            .harvest_asset(asset, existing.as_ref(), self.settings.incremental)
            .await;
        let labels: BTreeMap<Venue, &'static str> = harvest
            .outcomes
            .iter()
            .map(|(venue, outcome)| (*venue, outcome.label()))
            .collect();

        let status = match harvest.compose(existing) {
            Some(record) => match self.store.save(&record) {
                Ok(path) => {
                    info!(
                        "Wrote {} ({} venues: {}; {} candles)",
                        path.display(),
                        record.venues.len(),
                        record.venue_names(),
                        record.total_candles()
                    );
                    AssetStatus::Written {
                        venues: record.venues.len(),
                        candles: record.total_candles(),
                    }
                }
                Err(e) => {
                    error!("HarvestRunner: {}: {}", asset, e);
                    AssetStatus::Failed(e.to_string())
                }
            },
            None if had_record => {
                debug!("HarvestRunner: {} unchanged, keeping stored record", asset);
                AssetStatus::Kept
            }
            None => {
                warn!("HarvestRunner: {} has no data on any venue", asset);
                AssetStatus::NoData
            }
        };
        (status, labels)
    }
}

// =============================================================================
// Insights Run
// =============================================================================

/// Computes metrics for every stored asset and builds the report.
///
/// Missing or malformed records and assets with unusable primary series are
/// skipped; only an empty result fails the run.
pub fn compute_insights(
    store: &HistoryStore,
    assets: &[String],
    options: &InsightsOptions,
) -> Result<InsightsReport, RunError> {
    let mut accumulator = VenueMetricsAccumulator::new();
    let mut metrics = Vec::new();

    for asset in assets {
        let history = match store.load(asset) {
            Ok(Some(h)) => h,
            Ok(None) => continue,
            Err(e) => {
                warn!("Insights: skipping {}: {}", asset, e);
                continue;
            }
        };

        match build_asset_metrics(asset, &history, &mut accumulator) {
            Ok(m) => metrics.push(m),
            Err(e) => debug!("Insights: no metrics for {}: {}", asset, e),
        }
    }

    info!("Insights: metrics for {} of {} assets", metrics.len(), assets.len());
    build_report(metrics, &accumulator, options)
}

/// Writes the report as pretty JSON, atomically.
pub fn write_report(path: &Path, report: &InsightsReport) -> Result<(), RunError> {
    let body = serde_json::to_string_pretty(report)?;
    write_atomic(path, &body)?;
    info!("Insights: wrote {} (assets={})", path.display(), report.assets_processed);
    Ok(())
}

/// `compute_insights` followed by `write_report`.
pub fn run_insights(
    store: &HistoryStore,
    assets: &[String],
    options: &InsightsOptions,
    output: &Path,
) -> Result<InsightsReport, RunError> {
    let report = compute_insights(store, assets, options)?;
    write_report(output, &report)?;
    Ok(report)
}

// =============================================================================
// Tests
// =============================================================================
