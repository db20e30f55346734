// tests/harvest_pipeline.rs
//
// End-to-end: asset catalog -> harvest (mock venues) -> history store ->
// insights report, across two runs where one venue fails on the second.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use venue_quant::analytics::InsightsOptions;
use venue_quant::catalog::MarketResolver;
use venue_quant::engine::{run_insights, HarvestRunner, HarvestSettings};
use venue_quant::error::VenueFetchError;
use venue_quant::harvest::HistoryHarvester;
use venue_quant::models::{Candle, MarketRef, Venue, DAY_MS};
use venue_quant::store::{load_asset_catalog, HistoryStore};
use venue_quant::traits::{SharedVenueClient, VenueClient};

/// Serves a fixed close series for every listed base, optionally failing.
struct ScriptedVenue {
    venue: Venue,
    quote: &'static str,
    bases: Vec<&'static str>,
    closes: Vec<&'static str>,
    failing: AtomicBool,
}

impl ScriptedVenue {
    fn new(venue: Venue, quote: &'static str, bases: Vec<&'static str>, closes: Vec<&'static str>) -> Self {
        Self {
            venue,
            quote,
            bases,
            closes,
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl VenueClient for ScriptedVenue {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn list_tradable_pairs(&self) -> Result<Vec<MarketRef>, VenueFetchError> {
        Ok(self
            .bases
            .iter()
            .map(|b| MarketRef::new(self.venue, b, self.quote, format!("{}{}", b, self.quote)))
            .collect())
    }

    async fn fetch_daily_candles(
        &self,
        _market: &MarketRef,
        since_ms: Option<i64>,
    ) -> Result<Vec<Candle>, VenueFetchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VenueFetchError::new(self.venue, "HTTP 503 (gave up after 5 retries)"));
        }
        let since = since_ms.unwrap_or(0);
        Ok(self
            .closes
            .iter()
            .enumerate()
            .map(|(day, close)| {
                let px: Decimal = close.parse().unwrap();
                Candle::new(day as i64 * DAY_MS, px, px, px, px, Decimal::from(10))
            })
            .filter(|c| c.timestamp >= since)
            .collect())
    }
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "venue_quant_pipeline_{}",
        chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
    ));
    fs::create_dir_all(&dir).unwrap();
    dir
}

async fn runner(clients: Vec<SharedVenueClient>, store: &HistoryStore) -> HarvestRunner {
    let harvester = HistoryHarvester::prepare(clients, MarketResolver::new()).await;
    let settings = HarvestSettings {
        workers: 2,
        ..HarvestSettings::default()
    };
    HarvestRunner::new(harvester, store.clone(), settings)
}

#[tokio::test]
async fn test_two_runs_with_venue_failure() {
    let dir = scratch_dir();
    let catalog_path = dir.join("common_coins.json");
    fs::write(&catalog_path, r#"{"coins": ["btc", "ETH", "BTC", "XRP"]}"#).unwrap();
    let assets = load_asset_catalog(&catalog_path, &[], None).unwrap();
    assert_eq!(assets, vec!["BTC", "ETH", "XRP"]);

    let store = HistoryStore::new(dir.join("daily_histories"));

    let binance = Arc::new(ScriptedVenue::new(
        Venue::Binance,
        "USDT",
        vec!["BTC", "ETH"],
        vec!["100.00", "150.00"],
    ));
    let okx = Arc::new(ScriptedVenue::new(
        Venue::Okx,
        "USDT",
        vec!["BTC"],
        vec!["110.000", "150.000"],
    ));
    let clients: Vec<SharedVenueClient> = vec![
        binance.clone() as SharedVenueClient,
        okx.clone() as SharedVenueClient,
    ];

    // First run: BTC on both venues, ETH on binance only, XRP nowhere.
    let first = runner(clients.clone(), &store).await;
    let summary = first.run(assets.clone()).await.unwrap();
    assert_eq!(summary.written, 2);
    assert_eq!(summary.no_data, 1);

    let btc = store.load("BTC").unwrap().unwrap();
    assert_eq!(btc.venue_names(), "binance, okx");
    let okx_before = serde_json::to_string(&btc.venues[&Venue::Okx]).unwrap();
    assert!(okx_before.contains("\"close\":\"110.000\""));

    // Second run: okx is down. Its stored BTC series must survive untouched.
    okx.failing.store(true, Ordering::SeqCst);
    let second = runner(clients, &store).await;
    second.run(assets.clone()).await.unwrap();

    let btc = store.load("BTC").unwrap().unwrap();
    let okx_after = serde_json::to_string(&btc.venues[&Venue::Okx]).unwrap();
    assert_eq!(okx_before, okx_after);

    // Insights over what is stored.
    let output = dir.join("analytics").join("quant_insights.json");
    let report = run_insights(&store, &assets, &InsightsOptions::default(), &output).unwrap();

    assert_eq!(report.assets_processed, 2);
    let btc_metrics = &report.asset_metrics["BTC"];
    assert_eq!(btc_metrics.primary_venue, Venue::Binance);
    assert!((btc_metrics.series.cum_return - 0.5).abs() < 1e-12);
    // Day 0 quotes 100 vs 110, day 1 quotes 150 vs 150.
    let expected_rel = (10.0 / 105.0) / 2.0;
    assert!((btc_metrics.median_rel_spread.unwrap() - expected_rel).abs() < 1e-12);
    assert!((btc_metrics.median_abs_spread.unwrap() - 5.0).abs() < 1e-12);

    // ETH is single-venue: no spread, still counted in return medians.
    assert!(report.asset_metrics["ETH"].median_rel_spread.is_none());
    assert_eq!(report.spread_distribution.len(), 1);
    assert_eq!(report.return_distribution.len(), 2);
    assert!((report.summary.median_spread.unwrap() - expected_rel).abs() < 1e-12);
    assert_eq!(report.venue_summary[&Venue::Binance].count, 2);
    assert_eq!(report.venue_summary[&Venue::Okx].count, 1);

    let on_disk: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(on_disk["top_gainers"][0]["asset"], "BTC");
    assert!(on_disk["asset_metrics"]["ETH"]["median_rel_spread"].is_null());

    let _ = fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_malformed_record_is_refetched() {
    let dir = scratch_dir();
    let store = HistoryStore::new(dir.join("daily_histories"));
    fs::create_dir_all(store.dir()).unwrap();
    fs::write(store.path_for("BTC"), "{\"asset\": \"BTC\", \"venues\": [").unwrap();

    let binance: SharedVenueClient = Arc::new(ScriptedVenue::new(
        Venue::Binance,
        "USDT",
        vec!["BTC"],
        vec!["1.5", "2.5", "3.5"],
    ));
    let runner = runner(vec![binance], &store).await;
    let summary = runner.run(vec!["BTC".to_string()]).await.unwrap();
    assert_eq!(summary.written, 1);

    let btc = store.load("BTC").unwrap().unwrap();
    assert_eq!(btc.venues[&Venue::Binance].count, 3);
    assert_eq!(btc.venues[&Venue::Binance].market, "BTC/USDT");

    let _ = fs::remove_dir_all(&dir);
}
