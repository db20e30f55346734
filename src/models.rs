// src/models.rs

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// One day in milliseconds.
pub const DAY_MS: i64 = 86_400_000;

// =============================================================================
// Venue Types
// =============================================================================

/// Supported venues.
///
/// Declaration order is the iteration order of every per-asset venue map.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Coinbase,
    Bybit,
    Okx,
    Upbit,
}

impl Venue {
    pub const ALL: [Venue; 5] = [
        Venue::Binance,
        Venue::Coinbase,
        Venue::Bybit,
        Venue::Okx,
        Venue::Upbit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Venue::Binance => "binance",
            Venue::Coinbase => "coinbase",
            Venue::Bybit => "bybit",
            Venue::Okx => "okx",
            Venue::Upbit => "upbit",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "binance" => Ok(Venue::Binance),
            "coinbase" => Ok(Venue::Coinbase),
            "bybit" => Ok(Venue::Bybit),
            "okx" => Ok(Venue::Okx),
            "upbit" => Ok(Venue::Upbit),
            _ => Err(ConfigError::UnknownVenue(s.to_string())),
        }
    }
}

/// A resolved spot market on one venue.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarketRef {
    pub venue: Venue,
    /// Asset being priced (e.g., "BTC")
    pub base: String,
    /// Unit of price (e.g., "USDT")
    pub quote: String,
    /// Display form, e.g. "BTC/USDT"
    pub symbol: String,
    /// Identifier used for API calls ("BTCUSDT", "BTC-USD", "KRW-BTC", ...)
    pub market_id: String,
}

impl MarketRef {
    pub fn new(venue: Venue, base: &str, quote: &str, market_id: impl Into<String>) -> Self {
        let base = base.to_uppercase();
        let quote = quote.to_uppercase();
        Self {
            venue,
            symbol: format!("{}/{}", base, quote),
            base,
            quote,
            market_id: market_id.into(),
        }
    }
}

impl fmt::Display for MarketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.symbol)
    }
}

// =============================================================================
// Candles and Series
// =============================================================================

/// One daily OHLCV observation.
///
/// Prices are kept as decimals and written as strings so repeated
/// read-merge-write cycles never lose precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "timestamp_ms")]
    pub timestamp: i64,
    #[serde(default)]
    pub timestamp_iso: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub open: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub high: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub low: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub close: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub volume: Decimal,
}

impl Candle {
    pub fn new(
        timestamp: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            timestamp_iso: iso_from_ms(timestamp),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Close as a float, for metrics.
    pub fn close_f64(&self) -> Option<f64> {
        self.close.to_f64()
    }
}

/// Formats a millisecond timestamp as RFC 3339 UTC with a `Z` suffix.
pub fn iso_from_ms(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .unwrap_or_else(|| format!("unix_ms:{}", ts_ms))
}

/// One venue's stored series for an asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueSeries {
    /// Resolved display symbol, e.g. "BTC/USDT"
    pub market: String,
    pub quote: String,
    pub count: usize,
    pub candles: Vec<Candle>,
}

impl VenueSeries {
    pub fn new(market: &MarketRef, candles: Vec<Candle>) -> Self {
        Self {
            market: market.symbol.clone(),
            quote: market.quote.clone(),
            count: candles.len(),
            candles,
        }
    }

    pub fn last_timestamp(&self) -> Option<i64> {
        self.candles.last().map(|c| c.timestamp)
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }
}

/// The persisted unit: one record per asset, one series per venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetHistory {
    pub asset: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub venues: BTreeMap<Venue, VenueSeries>,
}

impl AssetHistory {
    pub fn new(asset: impl Into<String>, venues: BTreeMap<Venue, VenueSeries>) -> Self {
        Self {
            asset: asset.into(),
            generated_at: Utc::now(),
            venues,
        }
    }

    pub fn total_candles(&self) -> usize {
        self.venues.values().map(|s| s.count).sum()
    }

    /// Comma-joined venue names, for logging.
    pub fn venue_names(&self) -> String {
        self.venues
            .keys()
            .map(|v| v.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_venue_parse_and_display() {
        assert_eq!("OKX".parse::<Venue>().unwrap(), Venue::Okx);
        assert_eq!(" binance ".parse::<Venue>().unwrap(), Venue::Binance);
        assert!("kraken".parse::<Venue>().is_err());
        assert_eq!(Venue::Coinbase.to_string(), "coinbase");
    }

    #[test]
    fn test_candle_keeps_decimal_strings() {
        let candle = Candle::new(
            1_704_067_200_000,
            dec("42000.10"),
            dec("42500.00"),
            dec("41000.5"),
            dec("42250.000"),
            dec("0.00012300"),
        );
        assert_eq!(candle.timestamp_iso, "2024-01-01T00:00:00Z");

        let json = serde_json::to_string(&candle).unwrap();
        assert!(json.contains("\"close\":\"42250.000\""));
        assert!(json.contains("\"volume\":\"0.00012300\""));
        assert!(json.contains("\"timestamp_ms\":1704067200000"));

        let back: Candle = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn test_market_ref_symbol() {
        let m = MarketRef::new(Venue::Upbit, "btc", "krw", "KRW-BTC");
        assert_eq!(m.symbol, "BTC/KRW");
        assert_eq!(m.market_id, "KRW-BTC");
        assert_eq!(m.to_string(), "upbit:BTC/KRW");
    }

    #[test]
    fn test_venue_map_serializes_lowercase_keys() {
        let market = MarketRef::new(Venue::Okx, "ETH", "USDT", "ETH-USDT");
        let mut venues = BTreeMap::new();
        venues.insert(Venue::Okx, VenueSeries::new(&market, Vec::new()));
        let history = AssetHistory::new("ETH", venues);

        let json = serde_json::to_value(&history).unwrap();
        assert!(json["venues"]["okx"].is_object());
        assert_eq!(json["venues"]["okx"]["market"], "ETH/USDT");
    }
}
