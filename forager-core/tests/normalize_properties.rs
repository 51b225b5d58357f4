//! Property tests for config normalization.

use forager_core::config::{detect_version, normalize, SchemaVersion};
use proptest::prelude::*;
use serde_json::json;

fn legacy_side(
    ddown: f64,
    qty_pct: f64,
    markup: f64,
    spacing: f64,
    n_close_orders: u32,
) -> serde_json::Value {
    json!({
        "ddown_factor": ddown,
        "initial_eprice_ema_dist": 0.0,
        "initial_qty_pct": qty_pct,
        "markup_range": markup,
        "min_markup": markup / 10.0,
        "rentry_pprice_dist": spacing,
        "rentry_pprice_dist_wallet_exposure_weighting": 0.5,
        "ema_span_0": 240.0,
        "ema_span_1": 1440.0,
        "n_close_orders": n_close_orders,
    })
}

prop_compose! {
    fn arb_legacy_config()(
        ddown in 0.1f64..3.0,
        qty_pct in 0.001f64..0.1,
        markup in 0.001f64..0.1,
        spacing in 0.001f64..0.2,
        n_close_orders in 1u32..20,
        twe_long in 0.0f64..3.0,
        twe_short in 0.0f64..3.0,
        long_enabled in any::<bool>(),
        short_enabled in any::<bool>(),
        n_symbols in 1usize..8,
        balance in 100.0f64..1_000_000.0,
    ) -> serde_json::Value {
        let symbols: Vec<String> = (0..n_symbols).map(|i| format!("SYM{i}USDT")).collect();
        json!({
            "args": {
                "start_date": "2022-01-01",
                "end_date": "2022-06-01",
                "starting_balance": balance,
                "exchange": "binance",
                "symbols": symbols,
                "long_enabled": long_enabled,
                "short_enabled": short_enabled,
            },
            "live_config": {
                "global": {
                    "TWE_long": twe_long,
                    "TWE_short": twe_short,
                    "loss_allowance_pct": 0.01,
                    "stuck_threshold": 0.9,
                },
                "long": legacy_side(ddown, qty_pct, markup, spacing, n_close_orders),
                "short": legacy_side(ddown, qty_pct, markup, spacing, n_close_orders),
            },
        })
    }
}

proptest! {
    /// Normalizing a normalized config is a no-op.
    #[test]
    fn normalize_is_idempotent(raw in arb_legacy_config()) {
        let first = normalize(&raw).unwrap();
        let reserialized = serde_json::to_value(&first).unwrap();
        prop_assert_eq!(detect_version(&reserialized), SchemaVersion::V7);
        let second = normalize(&reserialized).unwrap();
        prop_assert_eq!(first, second);
    }

    /// The caller's document survives normalization byte-for-byte.
    #[test]
    fn normalize_never_mutates_the_input(raw in arb_legacy_config()) {
        let before = raw.clone();
        let _ = normalize(&raw).unwrap();
        prop_assert_eq!(raw, before);
    }

    /// A disabled side always comes out fully zeroed.
    #[test]
    fn disabled_sides_are_zeroed(raw in arb_legacy_config()) {
        let config = normalize(&raw).unwrap();
        if !raw["args"]["long_enabled"].as_bool().unwrap() {
            prop_assert_eq!(config.long.total_wallet_exposure_limit, 0.0);
            prop_assert_eq!(config.long.n_positions, 0);
        }
        if !raw["args"]["short_enabled"].as_bool().unwrap() {
            prop_assert_eq!(config.short.total_wallet_exposure_limit, 0.0);
            prop_assert_eq!(config.short.n_positions, 0);
        }
    }

    /// Position count is all-or-nothing against the approved list.
    #[test]
    fn n_positions_matches_symbol_count_or_zero(raw in arb_legacy_config()) {
        let config = normalize(&raw).unwrap();
        let n_symbols = raw["args"]["symbols"].as_array().unwrap().len();
        prop_assert!(
            config.long.n_positions == 0 || config.long.n_positions == n_symbols
        );
        prop_assert!(
            config.short.n_positions == 0 || config.short.n_positions == n_symbols
        );
    }
}
