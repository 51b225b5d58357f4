//! Multi-symbol candle provisioning: cache-first acquisition plus alignment
//! onto a shared minute grid.
//!
//! Each symbol resolves independently (cache hit, network fetch, or network
//! failure with cache fallback); the resolved columns are then aligned onto
//! the union of all observed minute ranges, forward-filling gaps and
//! back-filling leading holes, and packed into an [`HlcSeries`] whose sorted
//! symbol axis every downstream consumer keys off.

use super::hlc_cache::CandleCache;
use super::provider::{CandleProvider, DataError, FetchProgress, RawCandle};
use crate::series::{Hlc, HlcSeries};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

const MINUTE_MS: i64 = 60_000;

/// Resolve 1m HLC candles for all approved symbols over the date range and
/// align them into one series.
pub fn prepare_hlc_series(
    provider: &dyn CandleProvider,
    cache: &CandleCache,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    progress: &dyn FetchProgress,
) -> Result<HlcSeries, DataError> {
    let unique: BTreeSet<&str> = symbols.iter().map(String::as_str).collect();
    if unique.is_empty() {
        return Err(DataError::Other("no approved symbols".into()));
    }

    let start_ms = date_to_ms(start)?;
    let end_ms = date_to_ms(end)?;

    let total = unique.len();
    let mut resolved: BTreeMap<String, Vec<RawCandle>> = BTreeMap::new();
    let mut succeeded = 0;

    for (index, symbol) in unique.iter().enumerate() {
        progress.on_start(symbol, index, total);
        match resolve_symbol(provider, cache, symbol, start, start_ms, end_ms) {
            Ok(candles) => {
                progress.on_complete(symbol, index, total, &Ok(()));
                succeeded += 1;
                resolved.insert(symbol.to_string(), candles);
            }
            Err(e) => {
                let failed: Result<(), DataError> = Err(e);
                progress.on_complete(symbol, index, total, &failed);
                progress.on_batch_complete(succeeded, total - succeeded, total);
                return Err(failed.expect_err("constructed as Err above"));
            }
        }
    }
    progress.on_batch_complete(succeeded, 0, total);

    align(resolved)
}

/// Resolve one symbol: cache hit if it covers the range, else fetch and
/// persist, falling back to whatever the cache holds when the fetch fails.
fn resolve_symbol(
    provider: &dyn CandleProvider,
    cache: &CandleCache,
    symbol: &str,
    start: NaiveDate,
    start_ms: i64,
    end_ms: i64,
) -> Result<Vec<RawCandle>, DataError> {
    if cache.covers_range(symbol, start_ms, end_ms) {
        let candles = cache.load(symbol)?;
        return Ok(clip(candles, start_ms, end_ms));
    }

    let end = ms_to_date(end_ms)?;
    match provider.fetch_candles(symbol, start, end) {
        Ok(candles) => {
            cache.write(symbol, &candles, provider.name())?;
            Ok(clip(candles, start_ms, end_ms))
        }
        Err(fetch_err) => match cache.load(symbol) {
            Ok(candles) => {
                eprintln!("fetch failed for {symbol}, using cached candles: {fetch_err}");
                Ok(clip(candles, start_ms, end_ms))
            }
            Err(_) => Err(fetch_err),
        },
    }
}

fn clip(candles: Vec<RawCandle>, start_ms: i64, end_ms: i64) -> Vec<RawCandle> {
    candles
        .into_iter()
        .filter(|c| c.timestamp_ms >= start_ms && c.timestamp_ms < end_ms)
        .collect()
}

/// Align resolved per-symbol candles onto the union minute grid.
fn align(resolved: BTreeMap<String, Vec<RawCandle>>) -> Result<HlcSeries, DataError> {
    let first = resolved
        .values()
        .filter_map(|c| c.first().map(|c| c.timestamp_ms))
        .min();
    let last = resolved
        .values()
        .filter_map(|c| c.last().map(|c| c.timestamp_ms))
        .max();
    let (Some(first), Some(last)) = (first, last) else {
        return Err(DataError::ValidationError(
            "no candles in the requested range for any symbol".into(),
        ));
    };

    let first = floor_minute(first);
    let last = floor_minute(last);
    let timestamps: Vec<i64> = (first..=last).step_by(MINUTE_MS as usize).collect();

    let mut columns: BTreeMap<String, Vec<Hlc>> = BTreeMap::new();
    for (symbol, candles) in resolved {
        if candles.is_empty() {
            return Err(DataError::NoCachedCandles { symbol });
        }
        let by_minute: BTreeMap<i64, &RawCandle> = candles
            .iter()
            .map(|c| (floor_minute(c.timestamp_ms), c))
            .collect();

        let first_candle = candles.first().expect("checked non-empty above");
        let mut current = Hlc {
            high: first_candle.high,
            low: first_candle.low,
            close: first_candle.close,
        };
        let mut column = Vec::with_capacity(timestamps.len());
        for ts in &timestamps {
            if let Some(candle) = by_minute.get(ts) {
                current = Hlc {
                    high: candle.high,
                    low: candle.low,
                    close: candle.close,
                };
            }
            // Minutes before the symbol's first candle inherit it (bfill);
            // gaps and the tail carry the last observation (ffill).
            column.push(current);
        }
        columns.insert(symbol, column);
    }

    Ok(HlcSeries::from_symbol_columns(columns, timestamps)?)
}

fn floor_minute(ts_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(MINUTE_MS)
}

fn date_to_ms(date: NaiveDate) -> Result<i64, DataError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| DataError::ValidationError(format!("invalid date {date}")))
}

fn ms_to_date(ts_ms: i64) -> Result<NaiveDate, DataError> {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.date_naive())
        .ok_or_else(|| DataError::ValidationError(format!("invalid timestamp {ts_ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves a fixed candle ramp per symbol and counts fetches.
    struct FixtureProvider {
        start_ms: i64,
        n_minutes: usize,
        fetch_count: AtomicUsize,
    }

    impl FixtureProvider {
        fn new(start_ms: i64, n_minutes: usize) -> Self {
            Self {
                start_ms,
                n_minutes,
                fetch_count: AtomicUsize::new(0),
            }
        }
    }

    impl CandleProvider for FixtureProvider {
        fn name(&self) -> &str {
            "fixture"
        }

        fn fetch_candles(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<RawCandle>, DataError> {
            self.fetch_count.fetch_add(1, Ordering::Relaxed);
            Ok((0..self.n_minutes)
                .map(|i| RawCandle {
                    timestamp_ms: self.start_ms + i as i64 * MINUTE_MS,
                    high: 101.0 + i as f64,
                    low: 99.0 + i as f64,
                    close: 100.0 + i as f64,
                })
                .collect())
        }
    }

    struct SilentProgress;

    impl FetchProgress for SilentProgress {
        fn on_start(&self, _: &str, _: usize, _: usize) {}
        fn on_complete(&self, _: &str, _: usize, _: usize, _: &Result<(), DataError>) {}
        fn on_batch_complete(&self, _: usize, _: usize, _: usize) {}
    }

    const DAY_START_MS: i64 = 1_704_067_200_000; // 2024-01-01T00:00Z

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn fetch_populates_cache_and_second_run_hits_it() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        let provider = FixtureProvider::new(DAY_START_MS, 1440);
        let symbols = vec!["BTCUSDT".to_string()];

        let series = prepare_hlc_series(
            &provider,
            &cache,
            &symbols,
            date("2024-01-01"),
            date("2024-01-02"),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(series.n_steps(), 1440);
        assert_eq!(provider.fetch_count.load(Ordering::Relaxed), 1);

        let series2 = prepare_hlc_series(
            &provider,
            &cache,
            &symbols,
            date("2024-01-01"),
            date("2024-01-02"),
            &SilentProgress,
        )
        .unwrap();
        assert_eq!(series2.n_steps(), 1440);
        // Cache covered the range; no second network fetch.
        assert_eq!(provider.fetch_count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn symbols_are_deduplicated_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        let provider = FixtureProvider::new(DAY_START_MS, 10);
        let symbols = vec![
            "ETHUSDT".to_string(),
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
        ];

        let series = prepare_hlc_series(
            &provider,
            &cache,
            &symbols,
            date("2024-01-01"),
            date("2024-01-02"),
            &SilentProgress,
        )
        .unwrap();

        assert_eq!(series.symbols(), &["BTCUSDT", "ETHUSDT"]);
        assert_eq!(provider.fetch_count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn alignment_forward_fills_gaps() {
        // Candles at minutes 0, 1, 4 — minutes 2 and 3 must carry minute 1.
        struct GappyProvider;
        impl CandleProvider for GappyProvider {
            fn name(&self) -> &str {
                "gappy"
            }
            fn fetch_candles(
                &self,
                _symbol: &str,
                _start: NaiveDate,
                _end: NaiveDate,
            ) -> Result<Vec<RawCandle>, DataError> {
                Ok([0i64, 1, 4]
                    .iter()
                    .map(|&i| RawCandle {
                        timestamp_ms: DAY_START_MS + i * MINUTE_MS,
                        high: 10.0 + i as f64,
                        low: 8.0 + i as f64,
                        close: 9.0 + i as f64,
                    })
                    .collect())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        let symbols = vec!["BTCUSDT".to_string()];

        let series = prepare_hlc_series(
            &GappyProvider,
            &cache,
            &symbols,
            date("2024-01-01"),
            date("2024-01-02"),
            &SilentProgress,
        )
        .unwrap();

        assert_eq!(series.n_steps(), 5);
        let idx = series.symbol_index("BTCUSDT").unwrap();
        assert_eq!(series.get(2, idx).close, 10.0);
        assert_eq!(series.get(3, idx).close, 10.0);
        assert_eq!(series.get(4, idx).close, 13.0);
    }

    #[test]
    fn unresolvable_symbol_is_fatal() {
        struct BrokenProvider;
        impl CandleProvider for BrokenProvider {
            fn name(&self) -> &str {
                "broken"
            }
            fn fetch_candles(
                &self,
                symbol: &str,
                _start: NaiveDate,
                _end: NaiveDate,
            ) -> Result<Vec<RawCandle>, DataError> {
                Err(DataError::SymbolNotFound {
                    symbol: symbol.to_string(),
                })
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let cache = CandleCache::new(dir.path());
        let symbols = vec!["BTCUSDT".to_string()];

        let err = prepare_hlc_series(
            &BrokenProvider,
            &cache,
            &symbols,
            date("2024-01-01"),
            date("2024-01-02"),
            &SilentProgress,
        )
        .unwrap_err();
        assert!(matches!(err, DataError::SymbolNotFound { .. }));
    }
}
