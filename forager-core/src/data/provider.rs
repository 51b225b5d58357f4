//! Collaborator seams for market data acquisition and structured errors.
//!
//! The two traits abstract over where settings and candles come from
//! (exchange HTTP APIs in production, canned fixtures in tests) so the
//! provisioning logic can be exercised without a network.

use crate::domain::MarketSettings;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use thiserror::Error;

/// Raw 1m candle from a provider (epoch-millisecond open time).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawCandle {
    pub timestamp_ms: i64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("no cached candles for symbol '{symbol}'")]
    NoCachedCandles { symbol: String },

    #[error(
        "no market settings available online or cached for '{exchange}' \
         (fetch: {fetch}; cache: {cache})"
    )]
    SettingsUnavailable {
        exchange: String,
        fetch: String,
        cache: String,
    },

    #[error("series error: {0}")]
    Series(#[from] crate::series::SeriesError),

    #[error("data error: {0}")]
    Other(String),
}

/// Fetches per-symbol trading constraints for an exchange.
pub trait SettingsFetcher: Send + Sync {
    /// Human-readable name of this fetcher.
    fn name(&self) -> &str;

    /// Fetch current market-specific settings for every tradable symbol.
    fn fetch_market_settings(
        &self,
        exchange: &str,
    ) -> Result<BTreeMap<String, MarketSettings>, DataError>;
}

/// Fetches historical 1m HLC candles for a single symbol.
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch 1m candles covering `[start, end)`, oldest first.
    fn fetch_candles(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawCandle>, DataError>;
}

/// Progress callback for multi-symbol candle acquisition.
pub trait FetchProgress: Send {
    /// Called when starting to resolve a symbol.
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    /// Called when a symbol resolves (from cache or network).
    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<(), DataError>);

    /// Called when the whole batch is done.
    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Resolving candles for {symbol}...", index + 1, total);
    }

    fn on_complete(
        &self,
        symbol: &str,
        _index: usize,
        _total: usize,
        result: &Result<(), DataError>,
    ) {
        match result {
            Ok(()) => println!("  OK: {symbol}"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("Candles resolved: {succeeded}/{total} succeeded, {failed} failed");
    }
}
