// src/error.rs
//
// Error taxonomy for harvesting and metrics.
// Venue-level errors never escalate past the asset; asset-level metric errors
// never abort aggregation. Only `RunError` ends a run.

use crate::models::Venue;
use std::path::PathBuf;
use thiserror::Error;

/// The asset has no tradable pair on a venue. Expected and non-fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{venue} has no spot market for {asset}")]
pub struct NoMarketError {
    pub venue: Venue,
    pub asset: String,
}

/// A venue call failed after retries (network, HTTP status, rate limit, bad payload).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{venue} fetch failed: {cause}")]
pub struct VenueFetchError {
    pub venue: Venue,
    pub cause: String,
}

impl VenueFetchError {
    pub fn new(venue: Venue, cause: impl Into<String>) -> Self {
        Self {
            venue,
            cause: cause.into(),
        }
    }
}

/// A persisted record could not be decoded. Callers treat the record as absent.
#[derive(Debug, Error)]
#[error("malformed record {path}: {source}")]
pub struct MalformedRecordError {
    pub path: PathBuf,
    #[source]
    pub source: serde_json::Error,
}

/// Not enough usable prices to compute series statistics.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InsufficientDataError {
    #[error("need at least 2 candles, got {0}")]
    TooFewCandles(usize),
    #[error("non-positive close at series endpoint")]
    NonPositiveEndpoint,
    #[error("unparseable close price: {0}")]
    BadPrice(String),
    #[error("record has no venues")]
    NoVenues,
}

/// Errors from the on-disk history store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Malformed(#[from] MalformedRecordError),

    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode record for {asset}: {source}")]
    Encode {
        asset: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("unknown venue '{0}'")]
    UnknownVenue(String),
}

/// Run-level failures. These are the only errors that end a run.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("unable to read asset catalog {path}: {reason}")]
    AssetCatalog { path: PathBuf, reason: String },

    #[error("no assets yielded usable data")]
    NoUsableData,

    #[error("failed to encode insights report: {0}")]
    ReportEncode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
