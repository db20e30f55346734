// src/main.rs
//
// venue-quant: harvest daily OHLCV histories from several spot venues and
// compute cross-venue quant insights from them.

use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use venue_quant::config::{default_config_template, Config};
use venue_quant::connectors::build_clients;
use venue_quant::engine::{run_insights, HarvestRunner};
use venue_quant::error::RunError;
use venue_quant::harvest::HistoryHarvester;
use venue_quant::store::{load_asset_catalog, HistoryStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Fetch and merge daily candles into per-asset records
    Harvest,
    /// Compute the insights report from stored records
    Insights,
    /// Harvest, then compute insights
    All,
}

#[derive(Parser)]
#[command(name = "venue-quant")]
#[command(about = "Multi-venue daily OHLCV harvester and cross-venue quant insights")]
struct Args {
    /// Mode of operation
    #[arg(long, value_enum, default_value = "all")]
    mode: Mode,

    /// Path to configuration file (TOML)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Asset catalog JSON ({"coins": [...]})
    #[arg(long)]
    assets_file: Option<PathBuf>,

    /// Directory of per-asset history records
    #[arg(long)]
    history_dir: Option<PathBuf>,

    /// Insights report path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Comma-separated venue subset (binance,coinbase,bybit,okx,upbit)
    #[arg(long, value_delimiter = ',')]
    venues: Vec<String>,

    /// Comma-separated tickers to process
    #[arg(long, value_delimiter = ',')]
    only: Vec<String>,

    /// Process at most N assets
    #[arg(long)]
    max_assets: Option<usize>,

    /// Skip assets whose record already exists
    #[arg(long)]
    skip_existing: bool,

    /// Refetch full history instead of extending stored series
    #[arg(long)]
    full_refresh: bool,

    /// Concurrent asset workers
    #[arg(long)]
    workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Print a default configuration file and exit
    #[arg(long)]
    generate_config: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.generate_config {
        println!("{}", default_config_template());
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::from_file(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                eprintln!("Use --generate-config to create a template.");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.global.log_level.clone());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = apply_overrides(config, &args);

    if let Err(e) = run(args.mode, &config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Folds CLI flags over file values.
fn apply_overrides(mut config: Config, args: &Args) -> Config {
    if let Some(path) = &args.assets_file {
        config.global.assets_file = path.clone();
    }
    if let Some(dir) = &args.history_dir {
        config.global.history_dir = dir.clone();
    }
    if let Some(output) = &args.output {
        config.insights.output = output.clone();
    }
    if !args.venues.is_empty() {
        config.harvest.venues = args.venues.clone();
    }
    if !args.only.is_empty() {
        config.harvest.only = args.only.clone();
    }
    if args.max_assets.is_some() {
        config.harvest.max_assets = args.max_assets;
    }
    if let Some(workers) = args.workers {
        config.harvest.workers = workers;
    }
    config.harvest.skip_existing |= args.skip_existing;
    config.harvest.full_refresh |= args.full_refresh;
    config
}

async fn run(mode: Mode, config: &Config) -> Result<(), RunError> {
    let assets = load_asset_catalog(
        &config.global.assets_file,
        &config.harvest.only,
        config.harvest.max_assets,
    )?;
    if assets.is_empty() {
        warn!("No assets in {}", config.global.assets_file.display());
        return Err(RunError::NoUsableData);
    }
    let store = HistoryStore::new(&config.global.history_dir);

    if matches!(mode, Mode::Harvest | Mode::All) {
        let venues = config.venues()?;
        let clients = build_clients(&venues, &config.retry);
        let harvester = HistoryHarvester::prepare(clients, config.resolver()?).await;
        let runner = HarvestRunner::new(harvester, store.clone(), config.harvest_settings());

        let stop = runner.stop_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; finishing in-flight assets, then stopping");
                stop.store(true, Ordering::SeqCst);
            }
        });

        let summary = runner.run(assets.clone()).await?;
        if summary.stopped > 0 {
            info!("Stopped early; {} assets not started", summary.stopped);
            return Ok(());
        }
    }

    if matches!(mode, Mode::Insights | Mode::All) {
        let report = run_insights(
            &store,
            &assets,
            &config.insights.options,
            &config.insights.output,
        )?;
        info!(
            "Insights: {} assets, median return {:.4}, median drawdown {:.4}",
            report.assets_processed,
            report.summary.median_cum_return,
            report.summary.median_drawdown
        );
    }

    Ok(())
}
