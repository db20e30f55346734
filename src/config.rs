// src/config.rs
//
// Configuration file parsing. Every field has a default, so an empty file (or
// no file at all) is a valid configuration; CLI flags override file values.

use crate::analytics::InsightsOptions;
use crate::catalog::MarketResolver;
use crate::connectors::RetryPolicy;
use crate::engine::HarvestSettings;
use crate::error::ConfigError;
use crate::models::Venue;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// Configuration Types
// =============================================================================

/// Root configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub insights: InsightsConfig,
}

/// Global configuration settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Asset catalog JSON (`{"coins": [...]}`)
    pub assets_file: PathBuf,
    /// Directory of per-asset history records
    pub history_dir: PathBuf,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            assets_file: PathBuf::from("data/common_coins.json"),
            history_dir: PathBuf::from("data/daily_histories"),
        }
    }
}

/// Harvest run settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Venues to harvest; empty means all
    pub venues: Vec<String>,
    /// Restrict the run to these tickers
    pub only: Vec<String>,
    pub max_assets: Option<usize>,
    pub workers: usize,
    pub skip_existing: bool,
    /// Ignore stored cursors and refetch every venue's full history
    pub full_refresh: bool,
    /// Per-venue quote priority overrides, e.g. `upbit = ["KRW", "BTC"]`
    pub quote_priorities: BTreeMap<String, Vec<String>>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            venues: Vec::new(),
            only: Vec::new(),
            max_assets: None,
            workers: HarvestSettings::default().workers,
            skip_existing: false,
            full_refresh: false,
            quote_priorities: BTreeMap::new(),
        }
    }
}

/// Insights report settings.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InsightsConfig {
    pub output: PathBuf,
    #[serde(flatten)]
    pub options: InsightsOptions,
}

impl Default for InsightsConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("data/analytics/quant_insights.json"),
            options: InsightsOptions::default(),
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Venues to harvest, in configured order without duplicates.
    pub fn venues(&self) -> Result<Vec<Venue>, ConfigError> {
        parse_venues(&self.harvest.venues)
    }

    /// Resolver with any configured quote priority overrides applied.
    pub fn resolver(&self) -> Result<MarketResolver, ConfigError> {
        let mut resolver = MarketResolver::new();
        for (venue, priorities) in &self.harvest.quote_priorities {
            let venue: Venue = venue.parse()?;
            let priorities = priorities.iter().map(|q| q.trim().to_uppercase()).collect();
            resolver = resolver.with_priorities(venue, priorities);
        }
        Ok(resolver)
    }

    pub fn harvest_settings(&self) -> HarvestSettings {
        HarvestSettings {
            workers: self.harvest.workers.max(1),
            incremental: !self.harvest.full_refresh,
            skip_existing: self.harvest.skip_existing,
        }
    }
}

/// Parses venue names. An empty list selects every venue.
pub fn parse_venues<S: AsRef<str>>(names: &[S]) -> Result<Vec<Venue>, ConfigError> {
    if names.is_empty() {
        return Ok(Venue::ALL.to_vec());
    }
    let mut venues = Vec::new();
    for name in names {
        let venue: Venue = name.as_ref().parse()?;
        if !venues.contains(&venue) {
            venues.push(venue);
        }
    }
    Ok(venues)
}

// =============================================================================
// Default Configuration
// =============================================================================

/// Returns a default configuration string for documentation.
pub fn default_config_template() -> &'static str {
    r#"# venue-quant configuration
#
# Every key is optional. Command-line flags override values from this file.

[global]
log_level = "info"
assets_file = "data/common_coins.json"
history_dir = "data/daily_histories"

[harvest]
# Subset of: binance, coinbase, bybit, okx, upbit (empty = all)
venues = ["binance", "coinbase", "bybit", "okx", "upbit"]
workers = 4
skip_existing = false
full_refresh = false
# only = ["BTC", "ETH"]
# max_assets = 10

# Override the preferred quote currencies for a venue
# [harvest.quote_priorities]
# upbit = ["KRW", "BTC"]

[retry]
max_retries = 5
base_delay_ms = 500
max_delay_ms = 30000
min_request_interval_ms = 200

[insights]
output = "data/analytics/quant_insights.json"
top_movers = 5
top_spreads = 10
# spread_distribution_limit = 50
"#
}

// =============================================================================
// Tests
// =============================================================================
