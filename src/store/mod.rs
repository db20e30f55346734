// src/store/mod.rs
//
// On-disk persistence: one JSON record per asset under the history directory,
// plus the asset catalog input file. Records are replaced wholesale through a
// temp file + rename so an interrupted run never leaves a half-written record.

use crate::error::{MalformedRecordError, RunError, StoreError};
use crate::models::AssetHistory;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

// =============================================================================
// History Store
// =============================================================================

/// Directory of `<ASSET>.json` history records.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, asset: &str) -> PathBuf {
        self.dir.join(format!("{}.json", asset.to_uppercase()))
    }

    pub fn exists(&self, asset: &str) -> bool {
        self.path_for(asset).is_file()
    }

    /// Reads a record. `Ok(None)` when no record exists.
    pub fn load(&self, asset: &str) -> Result<Option<AssetHistory>, StoreError> {
        let path = self.path_for(asset);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| StoreError::Malformed(MalformedRecordError { path, source }))
    }

    /// Like `load`, but a malformed record is logged and treated as absent.
    pub fn load_or_absent(&self, asset: &str) -> Result<Option<AssetHistory>, StoreError> {
        match self.load(asset) {
            Err(StoreError::Malformed(e)) => {
                warn!("HistoryStore: {}; ignoring and refetching", e);
                Ok(None)
            }
            other => other,
        }
    }

    /// Writes a record atomically, creating the directory if needed.
    pub fn save(&self, history: &AssetHistory) -> Result<PathBuf, StoreError> {
        let path = self.path_for(&history.asset);
        let body = serde_json::to_string_pretty(history).map_err(|source| StoreError::Encode {
            asset: history.asset.clone(),
            source,
        })?;
        write_atomic(&path, &body)?;

        debug!("HistoryStore: wrote {}", path.display());
        Ok(path)
    }
}

/// Replaces `path` with `body` via a sibling temp file and a rename.
pub fn write_atomic(path: &Path, body: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, body).map_err(|source| StoreError::Io {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Asset Catalog Input
// =============================================================================

#[derive(Debug, Deserialize)]
struct AssetCatalogFile {
    #[serde(alias = "assets")]
    coins: Vec<String>,
}

/// Reads the asset list: upper-cased, order preserved, duplicates dropped.
///
/// `only` (when non-empty) keeps just the listed tickers; `max` caps the count
/// after filtering.
pub fn load_asset_catalog(
    path: &Path,
    only: &[String],
    max: Option<usize>,
) -> Result<Vec<String>, RunError> {
    let contents = fs::read_to_string(path).map_err(|e| RunError::AssetCatalog {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    let file: AssetCatalogFile =
        serde_json::from_str(&contents).map_err(|e| RunError::AssetCatalog {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    Ok(normalize_assets(file.coins, only, max))
}

/// Upper-cases, de-duplicates and filters a ticker list.
pub fn normalize_assets(
    assets: impl IntoIterator<Item = String>,
    only: &[String],
    max: Option<usize>,
) -> Vec<String> {
    let only: HashSet<String> = only.iter().map(|s| s.trim().to_uppercase()).collect();
    let mut seen = HashSet::new();

    let mut out: Vec<String> = assets
        .into_iter()
        .map(|a| a.trim().to_uppercase())
        .filter(|a| !a.is_empty())
        .filter(|a| only.is_empty() || only.contains(a))
        .filter(|a| seen.insert(a.clone()))
        .collect();

    if let Some(limit) = max {
        out.truncate(limit);
    }
    out
}

// =============================================================================
// Tests
// =============================================================================
