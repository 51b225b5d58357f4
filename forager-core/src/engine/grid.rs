//! Reference grid engine.
//!
//! A compact implementation of the engine contract so the pipeline runs
//! end-to-end: EMA-band initial entries, double-down grid re-entries with
//! exposure-weighted spacing, a markup close grid, exchange-constraint
//! rounding, maker-fee accrual, per-minute equity sampling, and
//! noisiness-gated symbol selection capped by `n_positions`.
//!
//! Trailing orders and unstuck execution are not modeled; the engine stays
//! swappable behind [`BacktestEngine`] for anything heavier.

use super::{
    BacktestEngine, BacktestParams, BotParams, BotParamsPair, EngineError, EngineOutput,
    ExchangeParams,
};
use crate::domain::{Fill, FillKind, Side};
use crate::series::{Hlc, HlcSeries};
use std::collections::BTreeMap;

const MINUTES_PER_DAY: f64 = 1440.0;

/// The built-in reference engine.
#[derive(Debug, Default, Clone, Copy)]
pub struct GridEngine;

#[derive(Debug, Clone, Copy, Default)]
struct Position {
    /// Unsigned size; zero means flat.
    size: f64,
    price: f64,
}

impl Position {
    fn is_open(&self) -> bool {
        self.size > 0.0
    }
}

/// Open positions for one side, indexed by symbol.
struct SideBook {
    positions: Vec<Position>,
}

impl SideBook {
    fn new(n_symbols: usize) -> Self {
        Self {
            positions: vec![Position::default(); n_symbols],
        }
    }

    fn n_open(&self) -> usize {
        self.positions.iter().filter(|p| p.is_open()).count()
    }
}

impl BacktestEngine for GridEngine {
    fn name(&self) -> &str {
        "grid_reference"
    }

    fn run(
        &self,
        hlcs: &HlcSeries,
        noisiness_indices: &[Vec<u32>],
        bot_params: &BotParamsPair,
        exchange_params: &[ExchangeParams],
        backtest_params: &BacktestParams,
    ) -> Result<EngineOutput, EngineError> {
        let n_symbols = hlcs.n_symbols();
        let n_steps = hlcs.n_steps();

        if exchange_params.len() != n_symbols {
            return Err(EngineError::ParamsMismatch {
                params: exchange_params.len(),
                symbols: n_symbols,
            });
        }
        if noisiness_indices.len() != n_steps {
            return Err(EngineError::IndicesMismatch {
                indices: noisiness_indices.len(),
                steps: n_steps,
            });
        }

        let mut state = EngineState::new(hlcs, bot_params, backtest_params.starting_balance);
        let mut fills: Vec<Fill> = Vec::new();
        let mut equities: Vec<f64> = Vec::with_capacity(n_steps);

        for step in 0..n_steps {
            state.update_emas(hlcs, step);

            for side in Side::BOTH {
                let params = bot_params.side(side);
                if !params.is_enabled() {
                    continue;
                }
                state.process_closes(
                    hlcs,
                    step,
                    side,
                    params,
                    exchange_params,
                    backtest_params,
                    &mut fills,
                );
                state.process_entries(
                    hlcs,
                    step,
                    side,
                    params,
                    exchange_params,
                    backtest_params,
                    &noisiness_indices[step],
                    &mut fills,
                );
            }

            equities.push(state.equity(hlcs, step, exchange_params));
        }

        let metrics = compute_metrics(&equities, &fills, backtest_params.starting_balance);

        Ok(EngineOutput {
            fills,
            equities,
            metrics,
        })
    }
}

/// Per-side EMA pair across all symbols.
///
/// Spans are in minutes; a span below one minute collapses to one.
struct EmaPair {
    fast: Vec<f64>,
    slow: Vec<f64>,
    alpha_fast: f64,
    alpha_slow: f64,
}

impl EmaPair {
    fn new(hlcs: &HlcSeries, params: &BotParams) -> Self {
        let first_closes: Vec<f64> = (0..hlcs.n_symbols()).map(|s| hlcs.get(0, s).close).collect();
        let alpha = |span: f64| 2.0 / (span.max(1.0) + 1.0);
        Self {
            fast: first_closes.clone(),
            slow: first_closes,
            alpha_fast: alpha(params.ema_span_0),
            alpha_slow: alpha(params.ema_span_1),
        }
    }

    fn update(&mut self, hlcs: &HlcSeries, step: usize) {
        for s in 0..self.fast.len() {
            let close = hlcs.get(step, s).close;
            self.fast[s] += self.alpha_fast * (close - self.fast[s]);
            self.slow[s] += self.alpha_slow * (close - self.slow[s]);
        }
    }
}

struct EngineState {
    balance: f64,
    emas_long: EmaPair,
    emas_short: EmaPair,
    long: SideBook,
    short: SideBook,
}

impl EngineState {
    fn new(hlcs: &HlcSeries, bot_params: &BotParamsPair, starting_balance: f64) -> Self {
        let n_symbols = hlcs.n_symbols();
        Self {
            balance: starting_balance,
            emas_long: EmaPair::new(hlcs, &bot_params.long),
            emas_short: EmaPair::new(hlcs, &bot_params.short),
            long: SideBook::new(n_symbols),
            short: SideBook::new(n_symbols),
        }
    }

    fn update_emas(&mut self, hlcs: &HlcSeries, step: usize) {
        if step == 0 {
            return;
        }
        self.emas_long.update(hlcs, step);
        self.emas_short.update(hlcs, step);
    }

    fn book(&mut self, side: Side) -> &mut SideBook {
        match side {
            Side::Long => &mut self.long,
            Side::Short => &mut self.short,
        }
    }

    fn book_ref(&self, side: Side) -> &SideBook {
        match side {
            Side::Long => &self.long,
            Side::Short => &self.short,
        }
    }

    /// EMA band edge the initial entry prices off: lower band for longs,
    /// upper band for shorts.
    fn ema_band(&self, symbol_idx: usize, side: Side) -> f64 {
        match side {
            Side::Long => self.emas_long.fast[symbol_idx].min(self.emas_long.slow[symbol_idx]),
            Side::Short => self.emas_short.fast[symbol_idx].max(self.emas_short.slow[symbol_idx]),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_closes(
        &mut self,
        hlcs: &HlcSeries,
        step: usize,
        side: Side,
        params: &BotParams,
        exchange_params: &[ExchangeParams],
        backtest_params: &BacktestParams,
        fills: &mut Vec<Fill>,
    ) {
        let dir = direction(side);
        for symbol_idx in 0..hlcs.n_symbols() {
            let position = self.book_ref(side).positions[symbol_idx];
            if !position.is_open() {
                continue;
            }
            let ep = &exchange_params[symbol_idx];
            let hlc = hlcs.get(step, symbol_idx);

            let exposure = qty_to_cost(position.size, position.price, ep.c_mult) / self.balance;
            let exposure_ratio = if params.wallet_exposure_limit > 0.0 {
                (exposure / params.wallet_exposure_limit).min(1.0)
            } else {
                1.0
            };
            let markup = params.close_grid_min_markup
                + params.close_grid_markup_range * (1.0 - exposure_ratio);
            let close_price = match side {
                Side::Long => round_up(position.price * (1.0 + markup), ep.price_step),
                Side::Short => round_dn(position.price * (1.0 - markup), ep.price_step),
            };
            if close_price <= 0.0 || !crossed(side, Crossing::Close, &hlc, close_price) {
                continue;
            }

            let close_qty = self.close_qty(&position, params, ep, close_price);
            if close_qty <= 0.0 {
                continue;
            }

            let pnl = dir * (close_price - position.price) * close_qty * ep.c_mult;
            let fee_paid = -qty_to_cost(close_qty, close_price, ep.c_mult) * backtest_params.maker_fee;
            self.balance += pnl + fee_paid;

            let book = self.book(side);
            let position = &mut book.positions[symbol_idx];
            position.size -= close_qty;
            if position.size < ep.min_qty {
                *position = Position::default();
            }
            let (psize, pprice) = (position.size, position.price);

            fills.push(Fill {
                minute: step as i64,
                symbol: hlcs.symbols()[symbol_idx].clone(),
                pnl,
                fee_paid,
                balance: self.balance,
                qty: -dir * close_qty,
                price: close_price,
                psize: dir * psize,
                pprice,
                side,
                kind: FillKind::CloseGrid,
            });
        }
    }

    /// Partial close sizing: a fraction of the full position per order, the
    /// degenerate parameter range collapsing to a full close.
    fn close_qty(
        &self,
        position: &Position,
        params: &BotParams,
        ep: &ExchangeParams,
        close_price: f64,
    ) -> f64 {
        if params.close_grid_qty_pct <= 0.0 || params.close_grid_qty_pct >= 1.0 {
            return position.size;
        }
        let full_psize = cost_to_qty(
            self.balance * params.wallet_exposure_limit,
            position.price,
            ep.c_mult,
        );
        let leftover = (position.size - full_psize).max(0.0);
        let qty = round_up(
            full_psize * params.close_grid_qty_pct + leftover,
            ep.qty_step,
        )
        .max(min_entry_qty(close_price, ep));
        qty.min(position.size)
    }

    #[allow(clippy::too_many_arguments)]
    fn process_entries(
        &mut self,
        hlcs: &HlcSeries,
        step: usize,
        side: Side,
        params: &BotParams,
        exchange_params: &[ExchangeParams],
        backtest_params: &BacktestParams,
        ranking: &[u32],
        fills: &mut Vec<Fill>,
    ) {
        if self.balance <= 0.0 {
            return;
        }

        // Grid re-entries for open positions.
        for symbol_idx in 0..hlcs.n_symbols() {
            if self.book_ref(side).positions[symbol_idx].is_open() {
                self.try_reentry(
                    hlcs,
                    step,
                    side,
                    symbol_idx,
                    params,
                    &exchange_params[symbol_idx],
                    backtest_params,
                    fills,
                );
            }
        }

        // Initial entries for free slots, noisiest symbols first.
        let mut open = self.book_ref(side).n_open();
        for &symbol_u32 in ranking {
            if open >= params.n_positions {
                break;
            }
            let symbol_idx = symbol_u32 as usize;
            if self.book_ref(side).positions[symbol_idx].is_open() {
                continue;
            }
            if self.try_initial_entry(
                hlcs,
                step,
                side,
                symbol_idx,
                params,
                &exchange_params[symbol_idx],
                backtest_params,
                fills,
            ) {
                open += 1;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_initial_entry(
        &mut self,
        hlcs: &HlcSeries,
        step: usize,
        side: Side,
        symbol_idx: usize,
        params: &BotParams,
        ep: &ExchangeParams,
        backtest_params: &BacktestParams,
        fills: &mut Vec<Fill>,
    ) -> bool {
        let dir = direction(side);
        let band = self.ema_band(symbol_idx, side);
        let entry_price = match side {
            Side::Long => round_dn(band * (1.0 - params.entry_initial_ema_dist), ep.price_step),
            Side::Short => round_up(band * (1.0 + params.entry_initial_ema_dist), ep.price_step),
        };
        let hlc = hlcs.get(step, symbol_idx);
        if entry_price <= 0.0 || !crossed(side, Crossing::Entry, &hlc, entry_price) {
            return false;
        }

        let cost = self.balance * params.wallet_exposure_limit * params.entry_initial_qty_pct;
        let qty = round_to_step(cost_to_qty(cost, entry_price, ep.c_mult), ep.qty_step)
            .max(min_entry_qty(entry_price, ep));
        if qty <= 0.0 {
            return false;
        }

        let fee_paid = -qty_to_cost(qty, entry_price, ep.c_mult) * backtest_params.maker_fee;
        self.balance += fee_paid;
        let book = self.book(side);
        book.positions[symbol_idx] = Position {
            size: qty,
            price: entry_price,
        };

        fills.push(Fill {
            minute: step as i64,
            symbol: hlcs.symbols()[symbol_idx].clone(),
            pnl: 0.0,
            fee_paid,
            balance: self.balance,
            qty: dir * qty,
            price: entry_price,
            psize: dir * qty,
            pprice: entry_price,
            side,
            kind: FillKind::EntryInitial,
        });
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn try_reentry(
        &mut self,
        hlcs: &HlcSeries,
        step: usize,
        side: Side,
        symbol_idx: usize,
        params: &BotParams,
        ep: &ExchangeParams,
        backtest_params: &BacktestParams,
        fills: &mut Vec<Fill>,
    ) {
        let dir = direction(side);
        let position = self.book_ref(side).positions[symbol_idx];

        let exposure = qty_to_cost(position.size, position.price, ep.c_mult) / self.balance;
        let exposure_ratio = exposure / params.wallet_exposure_limit.max(f64::MIN_POSITIVE);
        if exposure_ratio >= 1.0 {
            return;
        }

        let spacing = params.entry_grid_spacing_pct
            * (1.0 + exposure_ratio * params.entry_grid_spacing_weight);
        let entry_price = match side {
            Side::Long => round_dn(position.price * (1.0 - spacing), ep.price_step),
            Side::Short => round_up(position.price * (1.0 + spacing), ep.price_step),
        };
        let hlc = hlcs.get(step, symbol_idx);
        if entry_price <= 0.0 || !crossed(side, Crossing::Entry, &hlc, entry_price) {
            return;
        }

        let qty = round_to_step(
            position.size * params.entry_grid_double_down_factor,
            ep.qty_step,
        )
        .max(min_entry_qty(entry_price, ep));
        if qty <= 0.0 {
            return;
        }

        let fee_paid = -qty_to_cost(qty, entry_price, ep.c_mult) * backtest_params.maker_fee;
        self.balance += fee_paid;
        let book = self.book(side);
        let position = &mut book.positions[symbol_idx];
        let new_size = position.size + qty;
        position.price =
            (position.price * position.size + entry_price * qty) / new_size;
        position.size = new_size;
        let (psize, pprice) = (position.size, position.price);

        fills.push(Fill {
            minute: step as i64,
            symbol: hlcs.symbols()[symbol_idx].clone(),
            pnl: 0.0,
            fee_paid,
            balance: self.balance,
            qty: dir * qty,
            price: entry_price,
            psize: dir * psize,
            pprice,
            side,
            kind: FillKind::EntryGrid,
        });
    }

    /// Mark-to-market account value at a timestep.
    fn equity(&self, hlcs: &HlcSeries, step: usize, exchange_params: &[ExchangeParams]) -> f64 {
        let mut equity = self.balance;
        for side in Side::BOTH {
            let dir = direction(side);
            for (symbol_idx, position) in self.book_ref(side).positions.iter().enumerate() {
                if position.is_open() {
                    let close = hlcs.get(step, symbol_idx).close;
                    equity += dir
                        * (close - position.price)
                        * position.size
                        * exchange_params[symbol_idx].c_mult;
                }
            }
        }
        equity
    }
}

enum Crossing {
    Entry,
    Close,
}

/// Did this bar trade through the order price?
fn crossed(side: Side, crossing: Crossing, hlc: &Hlc, price: f64) -> bool {
    match (side, crossing) {
        // Long entries and short closes are buys below the market.
        (Side::Long, Crossing::Entry) | (Side::Short, Crossing::Close) => hlc.low < price,
        // Long closes and short entries are sells above the market.
        (Side::Long, Crossing::Close) | (Side::Short, Crossing::Entry) => hlc.high > price,
    }
}

fn direction(side: Side) -> f64 {
    match side {
        Side::Long => 1.0,
        Side::Short => -1.0,
    }
}

fn round_to_step(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).round() * step
}

fn round_up(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).ceil() * step
}

fn round_dn(value: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return value;
    }
    (value / step).floor() * step
}

fn cost_to_qty(cost: f64, price: f64, c_mult: f64) -> f64 {
    if price <= 0.0 || c_mult <= 0.0 {
        return 0.0;
    }
    cost / (price * c_mult)
}

fn qty_to_cost(qty: f64, price: f64, c_mult: f64) -> f64 {
    qty.abs() * price * c_mult
}

/// Smallest order the exchange accepts at a price.
fn min_entry_qty(price: f64, ep: &ExchangeParams) -> f64 {
    ep.min_qty
        .max(round_up(cost_to_qty(ep.min_cost, price, ep.c_mult), ep.qty_step))
}

fn compute_metrics(
    equities: &[f64],
    fills: &[Fill],
    starting_balance: f64,
) -> BTreeMap<String, f64> {
    let mut metrics = BTreeMap::new();

    let final_equity = equities.last().copied().unwrap_or(starting_balance);
    let days = equities.len() as f64 / MINUTES_PER_DAY;
    let adg = if days > 0.0 && starting_balance > 0.0 && final_equity > 0.0 {
        (final_equity / starting_balance).powf(1.0 / days) - 1.0
    } else {
        0.0
    };
    metrics.insert("adg".to_string(), adg);

    let mut peak = f64::MIN;
    let mut drawdown_worst: f64 = 0.0;
    for &equity in equities {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            drawdown_worst = drawdown_worst.max((peak - equity) / peak);
        }
    }
    metrics.insert("drawdown_worst".to_string(), drawdown_worst);

    let diff_mean = if equities.is_empty() {
        0.0
    } else {
        // Balance between fills is piecewise constant; walk both series.
        let mut balance = starting_balance;
        let mut fill_iter = fills.iter().peekable();
        let mut sum = 0.0;
        for (step, &equity) in equities.iter().enumerate() {
            while let Some(fill) = fill_iter.peek() {
                if fill.minute <= step as i64 {
                    balance = fill.balance;
                    fill_iter.next();
                } else {
                    break;
                }
            }
            if balance > 0.0 {
                sum += (equity - balance).abs() / balance;
            }
        }
        sum / equities.len() as f64
    };
    metrics.insert("equity_balance_diff_mean".to_string(), diff_mean);

    metrics.insert("n_fills".to_string(), fills.len() as f64);

    metrics
}
