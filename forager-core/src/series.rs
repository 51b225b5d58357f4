//! Minute-grid high/low/close series with an owned symbol axis.
//!
//! Symbol identity is bound into the series itself: the symbol axis is
//! sorted and unique, and anything derived per symbol (exchange params,
//! noisiness rankings, plots) is built by iterating `symbols()`, so
//! positional alignment with the data holds by construction.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// A single high/low/close observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hlc {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("series has no symbols")]
    NoSymbols,

    #[error("series has no timesteps")]
    NoTimesteps,

    #[error("symbol '{symbol}' has {actual} rows, expected {expected}")]
    LengthMismatch {
        symbol: String,
        expected: usize,
        actual: usize,
    },
}

/// Time × symbol × {high, low, close}, minute granularity.
///
/// Storage is row-major: all symbols for timestep 0, then timestep 1, and so
/// on. The symbol axis is sorted ascending and duplicate-free.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HlcSeries {
    symbols: Vec<String>,
    timestamps: Vec<i64>,
    values: Vec<Hlc>,
}

impl HlcSeries {
    /// Build a series from per-symbol columns of equal length.
    ///
    /// The `BTreeMap` keying yields the sorted, unique symbol axis.
    pub fn from_symbol_columns(
        columns: BTreeMap<String, Vec<Hlc>>,
        timestamps: Vec<i64>,
    ) -> Result<Self, SeriesError> {
        if columns.is_empty() {
            return Err(SeriesError::NoSymbols);
        }
        if timestamps.is_empty() {
            return Err(SeriesError::NoTimesteps);
        }
        let n_steps = timestamps.len();
        for (symbol, col) in &columns {
            if col.len() != n_steps {
                return Err(SeriesError::LengthMismatch {
                    symbol: symbol.clone(),
                    expected: n_steps,
                    actual: col.len(),
                });
            }
        }

        let symbols: Vec<String> = columns.keys().cloned().collect();
        let n_symbols = symbols.len();
        let mut values = Vec::with_capacity(n_steps * n_symbols);
        let cols: Vec<&Vec<Hlc>> = columns.values().collect();
        for step in 0..n_steps {
            for col in &cols {
                values.push(col[step]);
            }
        }

        Ok(Self {
            symbols,
            timestamps,
            values,
        })
    }

    pub fn n_steps(&self) -> usize {
        self.timestamps.len()
    }

    pub fn n_symbols(&self) -> usize {
        self.symbols.len()
    }

    /// The sorted, unique symbol axis.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Epoch-millisecond timestamps, one per minute step.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        self.symbols.binary_search_by(|s| s.as_str().cmp(symbol)).ok()
    }

    /// The observation at (timestep, symbol index).
    pub fn get(&self, step: usize, symbol_idx: usize) -> Hlc {
        self.values[step * self.symbols.len() + symbol_idx]
    }

    /// All closes for one symbol, in timestep order.
    pub fn closes(&self, symbol: &str) -> Option<Vec<f64>> {
        let idx = self.symbol_index(symbol)?;
        Some((0..self.n_steps()).map(|k| self.get(k, idx).close).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hlc(high: f64, low: f64, close: f64) -> Hlc {
        Hlc { high, low, close }
    }

    fn two_symbol_series() -> HlcSeries {
        let mut cols = BTreeMap::new();
        cols.insert(
            "ETHUSDT".to_string(),
            vec![hlc(11.0, 9.0, 10.0), hlc(12.0, 10.0, 11.0)],
        );
        cols.insert(
            "BTCUSDT".to_string(),
            vec![hlc(101.0, 99.0, 100.0), hlc(102.0, 100.0, 101.0)],
        );
        HlcSeries::from_symbol_columns(cols, vec![0, 60_000]).unwrap()
    }

    #[test]
    fn symbol_axis_is_sorted() {
        let series = two_symbol_series();
        assert_eq!(series.symbols(), &["BTCUSDT", "ETHUSDT"]);
    }

    #[test]
    fn get_respects_symbol_axis_order() {
        let series = two_symbol_series();
        let btc = series.symbol_index("BTCUSDT").unwrap();
        let eth = series.symbol_index("ETHUSDT").unwrap();
        assert_eq!(series.get(0, btc).close, 100.0);
        assert_eq!(series.get(1, eth).close, 11.0);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut cols = BTreeMap::new();
        cols.insert("BTCUSDT".to_string(), vec![hlc(1.0, 1.0, 1.0)]);
        let err = HlcSeries::from_symbol_columns(cols, vec![0, 60_000]).unwrap_err();
        assert!(matches!(err, SeriesError::LengthMismatch { .. }));
    }

    #[test]
    fn closes_extracts_one_symbol() {
        let series = two_symbol_series();
        assert_eq!(series.closes("ETHUSDT").unwrap(), vec![10.0, 11.0]);
        assert!(series.closes("XRPUSDT").is_none());
    }
}
