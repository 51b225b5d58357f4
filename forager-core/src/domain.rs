//! Shared domain types: trade sides, simulated fills, market constraints.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two independent trading directions.
///
/// Each side carries its own parameter set and independent PnL accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Both sides, in the order the rest of the pipeline iterates them.
    pub const BOTH: [Side; 2] = [Side::Long, Side::Short];

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a fill did: initial entry, grid re-entry, or grid close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillKind {
    EntryInitial,
    EntryGrid,
    CloseGrid,
}

impl FillKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FillKind::EntryInitial => "entry_initial",
            FillKind::EntryGrid => "entry_grid",
            FillKind::CloseGrid => "close_grid",
        }
    }
}

/// One simulated trade event as emitted by the backtest engine.
///
/// `minute` is the timestep index into the HLC series the engine ran over.
/// `balance` is the account balance immediately after the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub minute: i64,
    pub symbol: String,
    pub pnl: f64,
    pub fee_paid: f64,
    pub balance: f64,
    pub qty: f64,
    pub price: f64,
    pub psize: f64,
    pub pprice: f64,
    pub side: Side,
    pub kind: FillKind,
}

impl Fill {
    /// Categorical label combining action and side, e.g. `entry_grid_long`.
    pub fn label(&self) -> String {
        format!("{}_{}", self.kind.as_str(), self.side)
    }
}

/// Per-symbol trading constraints as reported by the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSettings {
    pub qty_step: f64,
    pub price_step: f64,
    pub min_qty: f64,
    pub min_cost: f64,
    pub c_mult: f64,
    pub maker: f64,
}
