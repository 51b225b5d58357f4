//! Forager Core — canonical config schema and migration, market data
//! acquisition, HLC series container, and the backtest engine contract.
//!
//! This crate contains everything below the orchestration layer:
//! - Domain types (sides, fills, market-specific settings)
//! - Canonical "v7" configuration schema with legacy-schema migration
//! - Market data acquisition: settings fetch with disk-cache fallback,
//!   1m-candle download with a per-symbol Parquet cache
//! - Minute-grid HLC series with a symbol-keyed axis
//! - Noisiness ranking
//! - Backtest engine contract and the built-in reference grid engine

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod noisiness;
pub mod series;
