//! Parquet cache for 1m HLC candles, partitioned per symbol and UTC day.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/{YYYY-MM-DD}.parquet`
//!
//! Features:
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per symbol (hash, time range, source)

use super::provider::{DataError, RawCandle};
use chrono::DateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleCacheMeta {
    pub symbol: String,
    pub first_timestamp_ms: i64,
    pub last_timestamp_ms: i64,
    pub candle_count: usize,
    pub data_hash: String,
    pub source: String,
    pub cached_at: chrono::NaiveDateTime,
}

/// The per-symbol candle cache.
pub struct CandleCache {
    cache_dir: PathBuf,
}

impl CandleCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Root directory of the cache.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Directory for a specific symbol: `{cache_dir}/symbol={SYMBOL}/`
    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    /// Path to the Parquet file for a symbol+day.
    fn day_path(&self, symbol: &str, day: chrono::NaiveDate) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{day}.parquet"))
    }

    /// Path to the metadata sidecar for a symbol.
    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    /// Write candles for a symbol, one Parquet file per UTC day.
    ///
    /// Writes are atomic: write to .tmp then rename.
    pub fn write(&self, symbol: &str, candles: &[RawCandle], source: &str) -> Result<(), DataError> {
        if candles.is_empty() {
            return Err(DataError::CacheError("no candles to cache".into()));
        }

        let sym_dir = self.symbol_dir(symbol);
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut by_day: HashMap<chrono::NaiveDate, Vec<&RawCandle>> = HashMap::new();
        for candle in candles {
            let day = DateTime::from_timestamp_millis(candle.timestamp_ms)
                .map(|dt| dt.date_naive())
                .ok_or_else(|| {
                    DataError::ValidationError(format!(
                        "invalid timestamp: {}",
                        candle.timestamp_ms
                    ))
                })?;
            by_day.entry(day).or_default().push(candle);
        }

        for (day, day_candles) in &by_day {
            let df = candles_to_dataframe(day_candles)?;
            let path = self.day_path(symbol, *day);
            let tmp_path = path.with_extension("parquet.tmp");

            write_parquet(&df, &tmp_path)?;

            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let hash_input: Vec<(i64, u64, u64, u64)> = candles
            .iter()
            .map(|c| {
                (
                    c.timestamp_ms,
                    c.high.to_bits(),
                    c.low.to_bits(),
                    c.close.to_bits(),
                )
            })
            .collect();
        let meta = CandleCacheMeta {
            symbol: symbol.to_string(),
            first_timestamp_ms: candles.first().map(|c| c.timestamp_ms).unwrap_or(0),
            last_timestamp_ms: candles.last().map(|c| c.timestamp_ms).unwrap_or(0),
            candle_count: candles.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(&hash_input)
                    .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            source: source.to_string(),
            cached_at: chrono::Utc::now().naive_utc(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        Ok(())
    }

    /// Load all cached candles for a symbol, sorted by timestamp ascending.
    pub fn load(&self, symbol: &str) -> Result<Vec<RawCandle>, DataError> {
        let sym_dir = self.symbol_dir(symbol);
        if !sym_dir.exists() {
            return Err(DataError::NoCachedCandles {
                symbol: symbol.to_string(),
            });
        }

        let mut all_candles = Vec::new();

        let entries =
            fs::read_dir(&sym_dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();

            // Skip non-parquet files (meta.json, .quarantined, etc)
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_and_validate_parquet(&path) {
                Ok(candles) => all_candles.extend(candles),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    eprintln!(
                        "WARNING: quarantining corrupt cache file {}: {e}",
                        path.display()
                    );
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        if all_candles.is_empty() {
            return Err(DataError::NoCachedCandles {
                symbol: symbol.to_string(),
            });
        }

        all_candles.sort_by_key(|c| c.timestamp_ms);
        Ok(all_candles)
    }

    /// Return the metadata sidecar for a symbol, if cached.
    pub fn get_meta(&self, symbol: &str) -> Option<CandleCacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Check if cached data for a symbol covers `[start_ms, end_ms)`.
    pub fn covers_range(&self, symbol: &str, start_ms: i64, end_ms: i64) -> bool {
        match self.get_meta(symbol) {
            None => false,
            Some(meta) => {
                // Last candle's open time must reach the final minute of the range.
                meta.first_timestamp_ms <= start_ms && meta.last_timestamp_ms >= end_ms - 60_000
            }
        }
    }
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn candles_to_dataframe(candles: &[&RawCandle]) -> Result<DataFrame, DataError> {
    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp_ms).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    DataFrame::new(vec![
        Column::new("timestamp_ms".into(), timestamps),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<RawCandle>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }

    for col_name in ["timestamp_ms", "high", "low", "close"] {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_candles(&df)
}

fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<RawCandle>, DataError> {
    let map_err = |e: PolarsError| DataError::ParquetError(format!("column read: {e}"));

    let ts_ca = df
        .column("timestamp_ms")
        .map_err(map_err)?
        .i64()
        .map_err(|e| DataError::ParquetError(format!("timestamp column type: {e}")))?;
    let high_ca = df
        .column("high")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::ParquetError(format!("high column type: {e}")))?;
    let low_ca = df
        .column("low")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::ParquetError(format!("low column type: {e}")))?;
    let close_ca = df
        .column("close")
        .map_err(map_err)?
        .f64()
        .map_err(|e| DataError::ParquetError(format!("close column type: {e}")))?;

    let n = df.height();
    let mut candles = Vec::with_capacity(n);

    for i in 0..n {
        let timestamp_ms = ts_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null timestamp at row {i}")))?;
        candles.push(RawCandle {
            timestamp_ms,
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(candles)
}
