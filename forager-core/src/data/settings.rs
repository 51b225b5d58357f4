//! Market-specific settings acquisition with a disk-cache fallback.
//!
//! Policy: try the remote fetch first; on success persist the result to the
//! deterministic cache path and report `Remote`. On any fetch failure, fall
//! back to the cache and report `Cached`. If the cache also fails, the whole
//! operation fails with a single structured error carrying both causes —
//! there is no further fallback.

use super::provider::{DataError, SettingsFetcher};
use crate::domain::MarketSettings;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Where the settings in use came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsOrigin {
    Remote,
    Cached,
}

/// Deterministic cache path for an exchange's settings:
/// `<base_dir>/forager/<exchange>/market_specific_settings.json`
pub fn settings_cache_path(base_dir: &Path, exchange: &str) -> PathBuf {
    base_dir
        .join("forager")
        .join(exchange)
        .join("market_specific_settings.json")
}

/// Resolve market-specific settings, remote-first with cache fallback.
pub fn ensure_market_settings(
    fetcher: &dyn SettingsFetcher,
    base_dir: &Path,
    exchange: &str,
) -> Result<(BTreeMap<String, MarketSettings>, SettingsOrigin), DataError> {
    let cache_path = settings_cache_path(base_dir, exchange);

    match fetcher.fetch_market_settings(exchange) {
        Ok(settings) => {
            persist_settings(&cache_path, &settings)?;
            Ok((settings, SettingsOrigin::Remote))
        }
        Err(fetch_err) => {
            eprintln!("failed to fetch market specific settings: {fetch_err}");
            match load_settings(&cache_path) {
                Ok(settings) => {
                    println!(
                        "loaded market specific settings from cache {}",
                        cache_path.display()
                    );
                    Ok((settings, SettingsOrigin::Cached))
                }
                Err(cache_err) => Err(DataError::SettingsUnavailable {
                    exchange: exchange.to_string(),
                    fetch: fetch_err.to_string(),
                    cache: cache_err.to_string(),
                }),
            }
        }
    }
}

fn persist_settings(
    path: &Path,
    settings: &BTreeMap<String, MarketSettings>,
) -> Result<(), DataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;
    }
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| DataError::CacheError(format!("settings serialization: {e}")))?;
    fs::write(path, json).map_err(|e| DataError::CacheError(format!("settings write: {e}")))
}

fn load_settings(path: &Path) -> Result<BTreeMap<String, MarketSettings>, DataError> {
    let content = fs::read_to_string(path)
        .map_err(|e| DataError::CacheError(format!("settings read: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| DataError::CacheError(format!("settings parse: {e}")))
}
