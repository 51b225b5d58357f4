//! Canonical ("v7") configuration schema.

use serde::{Deserialize, Serialize};

/// Canonical backtest configuration.
///
/// All input documents — already-canonical or legacy — normalize to this
/// shape before anything downstream runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub backtest: BacktestSection,
    pub approved_symbols: Vec<String>,
    pub long: BotSideParams,
    pub short: BotSideParams,
}

/// Exchange identity, date range, starting balance, and base storage dir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSection {
    pub base_dir: String,
    pub end_date: String,
    pub exchange: String,
    pub start_date: String,
    pub starting_balance: f64,
}

/// Per-side parameter block of the canonical schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotSideParams {
    pub close_grid_markup_range: f64,
    pub close_grid_min_markup: f64,
    pub close_grid_qty_pct: f64,
    pub close_trailing_grid_ratio: f64,
    pub ema_span_0: f64,
    pub ema_span_1: f64,
    pub entry_grid_double_down_factor: f64,
    pub entry_grid_spacing_pct: f64,
    pub entry_grid_spacing_weight: f64,
    pub entry_initial_ema_dist: f64,
    pub entry_initial_qty_pct: f64,
    pub entry_trailing_grid_ratio: f64,
    pub n_positions: usize,
    pub total_wallet_exposure_limit: f64,
    pub unstuck_loss_allowance_pct: f64,
    pub unstuck_threshold: f64,
}

impl Config {
    /// The canonical template: the key set every canonical config must
    /// contain, with workable default values.
    pub fn template() -> Self {
        let side = BotSideParams {
            close_grid_markup_range: 0.03,
            close_grid_min_markup: 0.001,
            close_grid_qty_pct: 0.85,
            close_trailing_grid_ratio: 0.0,
            ema_span_0: 400.0,
            ema_span_1: 1000.0,
            entry_grid_double_down_factor: 0.9,
            entry_grid_spacing_pct: 0.04,
            entry_grid_spacing_weight: 0.7,
            entry_initial_ema_dist: 0.0,
            entry_initial_qty_pct: 0.01,
            entry_trailing_grid_ratio: 0.0,
            n_positions: 0,
            total_wallet_exposure_limit: 1.0,
            unstuck_loss_allowance_pct: 0.002,
            unstuck_threshold: 0.9,
        };
        Self {
            backtest: BacktestSection {
                base_dir: "backtests".to_string(),
                end_date: "2024-01-01".to_string(),
                exchange: "binance".to_string(),
                start_date: "2023-01-01".to_string(),
                starting_balance: 100_000.0,
            },
            approved_symbols: Vec::new(),
            long: side.clone(),
            short: side,
        }
    }
}
