//! Fills & equity analysis.
//!
//! Derives per-side loss/profit ratios and the long/short PnL split from
//! the engine's fill log, and reconciles the two independently-sampled
//! series — balance (event-driven, from fills) and equity (one sample per
//! minute) — onto one common 60-minute grid.

use forager_core::domain::{Fill, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const BUCKET_MINUTES: i64 = 60;

/// Balance and equity reconciled onto a shared 60-minute index.
///
/// After forward/backward filling there are no missing entries: both
/// columns cover every bucket of the unified index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceEquity {
    pub minutes: Vec<i64>,
    pub balance: Vec<f64>,
    pub equity: Vec<f64>,
}

impl BalanceEquity {
    pub fn len(&self) -> usize {
        self.minutes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minutes.is_empty()
    }
}

/// Compute analyzer metrics and the reconciled balance/equity table.
///
/// Metrics:
/// - `loss_profit_ratio_<side>`: |loss / profit| per side; a side with no
///   fills at all is neutral (`1.0`). A side with fills but exactly zero
///   profit and nonzero loss divides to a non-finite value — that sharp
///   edge is left unguarded.
/// - `pnl_ratio_long_short`: long net over combined net (NaN when both
///   sides net to zero).
pub fn analyze_fills(fills: &[Fill], equities: &[f64]) -> (BTreeMap<String, f64>, BalanceEquity) {
    let mut metrics = BTreeMap::new();
    let mut net = BTreeMap::new();

    for side in Side::BOTH {
        let side_fills: Vec<&Fill> = fills.iter().filter(|f| f.side == side).collect();
        if side_fills.is_empty() {
            net.insert(side, 0.0);
            metrics.insert(format!("loss_profit_ratio_{side}"), 1.0);
            continue;
        }
        let profit: f64 = side_fills.iter().map(|f| f.pnl).filter(|p| *p > 0.0).sum();
        let loss: f64 = side_fills.iter().map(|f| f.pnl).filter(|p| *p < 0.0).sum();
        net.insert(side, profit + loss);
        metrics.insert(format!("loss_profit_ratio_{side}"), (loss / profit).abs());
    }

    let long_net = net[&Side::Long];
    let short_net = net[&Side::Short];
    metrics.insert(
        "pnl_ratio_long_short".to_string(),
        long_net / (long_net + short_net),
    );

    (metrics, reconcile(fills, equities))
}

/// Reconcile balance events and equity samples onto one 60-minute grid.
///
/// Balance is bucketed by taking the last observation in each 60-minute
/// window. Equity is subsampled positionally (every 60th sample), which is
/// exact only when the engine emits one sample per minute with no gaps.
/// The unified index spans the union of both ranges; each column is
/// forward-filled, then back-filled to cover leading buckets.
fn reconcile(fills: &[Fill], equities: &[f64]) -> BalanceEquity {
    let mut balance_buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for fill in fills {
        balance_buckets.insert(fill.minute.div_euclid(BUCKET_MINUTES) * BUCKET_MINUTES, fill.balance);
    }

    let equity_buckets: BTreeMap<i64, f64> = equities
        .iter()
        .step_by(BUCKET_MINUTES as usize)
        .enumerate()
        .map(|(i, &equity)| (i as i64 * BUCKET_MINUTES, equity))
        .collect();

    let firsts = [
        balance_buckets.keys().next().copied(),
        equity_buckets.keys().next().copied(),
    ];
    let lasts = [
        balance_buckets.keys().next_back().copied(),
        equity_buckets.keys().next_back().copied(),
    ];
    let (Some(first), Some(last)) = (
        firsts.iter().flatten().min().copied(),
        lasts.iter().flatten().max().copied(),
    ) else {
        // Nothing on either axis; there is nothing to reconcile.
        return BalanceEquity::default();
    };

    let minutes: Vec<i64> = (first..=last).step_by(BUCKET_MINUTES as usize).collect();
    let balance = fill_onto(&minutes, &balance_buckets);
    let equity = fill_onto(&minutes, &equity_buckets);

    BalanceEquity {
        minutes,
        balance,
        equity,
    }
}

/// Project bucketed observations onto the unified index, forward-filling
/// then back-filling so neither end is left empty.
fn fill_onto(minutes: &[i64], buckets: &BTreeMap<i64, f64>) -> Vec<f64> {
    let mut forward: Vec<Option<f64>> = Vec::with_capacity(minutes.len());
    let mut latest = None;
    for minute in minutes {
        if let Some(value) = buckets.get(minute) {
            latest = Some(*value);
        }
        forward.push(latest);
    }

    let first_observed = forward.iter().flatten().next().copied();
    forward
        .into_iter()
        .map(|v| v.or(first_observed).unwrap_or(f64::NAN))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use forager_core::domain::FillKind;

    fn fill(minute: i64, side: Side, pnl: f64, balance: f64) -> Fill {
        Fill {
            minute,
            symbol: "BTCUSDT".to_string(),
            pnl,
            fee_paid: 0.0,
            balance,
            qty: 1.0,
            price: 100.0,
            psize: 1.0,
            pprice: 100.0,
            side,
            kind: FillKind::CloseGrid,
        }
    }

    #[test]
    fn zero_fill_side_is_neutral() {
        let fills = vec![
            fill(0, Side::Long, 10.0, 1010.0),
            fill(1, Side::Long, -4.0, 1006.0),
        ];
        let equities: Vec<f64> = (0..120).map(|_| 1000.0).collect();

        let (metrics, _) = analyze_fills(&fills, &equities);

        assert_eq!(metrics["loss_profit_ratio_short"], 1.0);
        // Short net contributes nothing: ratio is long / (long + 0).
        assert_eq!(metrics["pnl_ratio_long_short"], 1.0);
    }

    #[test]
    fn mixed_sides_split_profit_and_loss() {
        let fills = vec![
            fill(0, Side::Long, 10.0, 1010.0),
            fill(1, Side::Long, -4.0, 1006.0),
            fill(2, Side::Short, 6.0, 1012.0),
        ];
        let equities: Vec<f64> = (0..60).map(|_| 1000.0).collect();

        let (metrics, _) = analyze_fills(&fills, &equities);

        assert!((metrics["loss_profit_ratio_long"] - 0.4).abs() < 1e-12);
        assert_eq!(metrics["loss_profit_ratio_short"], 0.0);
        assert!((metrics["pnl_ratio_long_short"] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn reconciled_index_spans_the_union_of_both_ranges() {
        // Balance events only in the first hour; equity samples run longer.
        let fills = vec![
            fill(5, Side::Long, 1.0, 1001.0),
            fill(59, Side::Long, 1.0, 1002.0),
        ];
        let equities: Vec<f64> = (0..300).map(|i| 1000.0 + i as f64).collect();

        let (_, table) = analyze_fills(&fills, &equities);

        assert_eq!(table.minutes.first().copied(), Some(0));
        assert_eq!(table.minutes.last().copied(), Some(240));
        assert_eq!(
            table.minutes,
            vec![0, 60, 120, 180, 240]
        );
        // No gaps after fill: every bucket has finite values.
        assert!(table.balance.iter().all(|b| b.is_finite()));
        assert!(table.equity.iter().all(|e| e.is_finite()));
        // Balance forward-fills past its last event.
        assert!(table.balance.iter().skip(1).all(|&b| b == 1002.0));
    }

    #[test]
    fn balance_bucket_takes_the_last_observation() {
        let fills = vec![
            fill(0, Side::Long, 1.0, 1001.0),
            fill(30, Side::Long, 1.0, 1002.0),
            fill(59, Side::Long, 1.0, 1003.0),
            fill(60, Side::Long, 1.0, 1004.0),
        ];
        let equities: Vec<f64> = (0..121).map(|_| 1000.0).collect();

        let (_, table) = analyze_fills(&fills, &equities);

        assert_eq!(table.balance[0], 1003.0);
        assert_eq!(table.balance[1], 1004.0);
    }

    #[test]
    fn equity_is_subsampled_positionally() {
        let fills = vec![fill(0, Side::Long, 1.0, 1001.0)];
        let equities: Vec<f64> = (0..180).map(|i| i as f64).collect();

        let (_, table) = analyze_fills(&fills, &equities);

        assert_eq!(table.equity, vec![0.0, 60.0, 120.0]);
    }

    #[test]
    fn leading_balance_buckets_are_backfilled() {
        // First balance event lands in the third bucket.
        let fills = vec![fill(130, Side::Long, 1.0, 1005.0)];
        let equities: Vec<f64> = (0..240).map(|_| 1000.0).collect();

        let (_, table) = analyze_fills(&fills, &equities);

        assert_eq!(table.minutes[0], 0);
        assert_eq!(table.balance[0], 1005.0);
        assert_eq!(table.balance[1], 1005.0);
    }

    #[test]
    fn empty_fills_and_equity_reconcile_to_an_empty_table() {
        let (metrics, table) = analyze_fills(&[], &[]);
        assert!(table.is_empty());
        assert_eq!(metrics["loss_profit_ratio_long"], 1.0);
        assert_eq!(metrics["loss_profit_ratio_short"], 1.0);
        // 0/0: undefined by design.
        assert!(metrics["pnl_ratio_long_short"].is_nan());
    }
}
