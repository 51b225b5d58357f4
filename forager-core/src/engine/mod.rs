//! Backtest engine contract.
//!
//! The simulation itself is a black box behind [`BacktestEngine`]: the
//! orchestrator hands it the aligned HLC series, the per-timestep noisiness
//! ranking, per-side bot parameters, per-symbol exchange parameters (in the
//! series' symbol order), and global backtest parameters, and takes back
//! fills, the equity curve, and the engine's own metrics unchanged.

pub mod grid;

pub use grid::GridEngine;

use crate::config::BotSideParams;
use crate::domain::{Fill, MarketSettings, Side};
use crate::series::HlcSeries;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Engine-shaped per-side parameters.
///
/// `wallet_exposure_limit` is the derived per-position limit
/// (`total_wallet_exposure_limit / n_positions`, or `0.0` for a disabled
/// side); everything else carries over from the canonical config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotParams {
    pub close_grid_markup_range: f64,
    pub close_grid_min_markup: f64,
    pub close_grid_qty_pct: f64,
    pub ema_span_0: f64,
    pub ema_span_1: f64,
    pub entry_grid_double_down_factor: f64,
    pub entry_grid_spacing_pct: f64,
    pub entry_grid_spacing_weight: f64,
    pub entry_initial_ema_dist: f64,
    pub entry_initial_qty_pct: f64,
    pub n_positions: usize,
    pub total_wallet_exposure_limit: f64,
    pub unstuck_loss_allowance_pct: f64,
    pub unstuck_threshold: f64,
    pub wallet_exposure_limit: f64,
}

impl BotParams {
    /// Build engine params from a canonical side block, deriving the
    /// per-position exposure limit. A side with zero positions gets `0.0`
    /// rather than dividing by zero.
    pub fn from_side_params(params: &BotSideParams) -> Self {
        let wallet_exposure_limit = if params.n_positions > 0 {
            params.total_wallet_exposure_limit / params.n_positions as f64
        } else {
            0.0
        };
        Self {
            close_grid_markup_range: params.close_grid_markup_range,
            close_grid_min_markup: params.close_grid_min_markup,
            close_grid_qty_pct: params.close_grid_qty_pct,
            ema_span_0: params.ema_span_0,
            ema_span_1: params.ema_span_1,
            entry_grid_double_down_factor: params.entry_grid_double_down_factor,
            entry_grid_spacing_pct: params.entry_grid_spacing_pct,
            entry_grid_spacing_weight: params.entry_grid_spacing_weight,
            entry_initial_ema_dist: params.entry_initial_ema_dist,
            entry_initial_qty_pct: params.entry_initial_qty_pct,
            n_positions: params.n_positions,
            total_wallet_exposure_limit: params.total_wallet_exposure_limit,
            unstuck_loss_allowance_pct: params.unstuck_loss_allowance_pct,
            unstuck_threshold: params.unstuck_threshold,
            wallet_exposure_limit,
        }
    }

    /// A disabled side cannot open positions.
    pub fn is_enabled(&self) -> bool {
        self.wallet_exposure_limit > 0.0 && self.n_positions > 0
    }
}

/// Both sides' engine parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotParamsPair {
    pub long: BotParams,
    pub short: BotParams,
}

impl BotParamsPair {
    pub fn side(&self, side: Side) -> &BotParams {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }
}

/// Per-symbol exchange constraints, in the series' symbol order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeParams {
    pub qty_step: f64,
    pub price_step: f64,
    pub min_qty: f64,
    pub min_cost: f64,
    pub c_mult: f64,
}

impl From<&MarketSettings> for ExchangeParams {
    fn from(settings: &MarketSettings) -> Self {
        Self {
            qty_step: settings.qty_step,
            price_step: settings.price_step,
            min_qty: settings.min_qty,
            min_cost: settings.min_cost,
            c_mult: settings.c_mult,
        }
    }
}

/// Global backtest parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub starting_balance: f64,
    pub maker_fee: f64,
    pub symbols: Vec<String>,
}

/// Everything the engine hands back.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub fills: Vec<Fill>,
    /// Mark-to-market account value, one sample per minute timestep.
    pub equities: Vec<f64>,
    /// Engine-native metrics, merged ahead of analyzer metrics downstream.
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("exchange params count ({params}) does not match series symbols ({symbols})")]
    ParamsMismatch { params: usize, symbols: usize },

    #[error("noisiness indices cover {indices} steps, series has {steps}")]
    IndicesMismatch { indices: usize, steps: usize },

    #[error("engine failure: {0}")]
    Other(String),
}

/// The trade-simulation black box.
pub trait BacktestEngine: Send + Sync {
    /// Human-readable name of this engine.
    fn name(&self) -> &str;

    /// Run the simulation over the full series.
    ///
    /// `exchange_params` must align index-for-index with `hlcs.symbols()`;
    /// implementations reject mismatched shapes.
    fn run(
        &self,
        hlcs: &HlcSeries,
        noisiness_indices: &[Vec<u32>],
        bot_params: &BotParamsPair,
        exchange_params: &[ExchangeParams],
        backtest_params: &BacktestParams,
    ) -> Result<EngineOutput, EngineError>;
}
