//! End-to-end pipeline test: legacy config in, full artifact set out.

use forager_core::config::Config;
use forager_core::data::{CandleProvider, DataError, RawCandle, SettingsFetcher, SettingsOrigin};
use forager_core::domain::MarketSettings;
use forager_core::engine::GridEngine;
use forager_runner::{run_forager, BitmapRenderer};
use serde_json::json;
use std::collections::BTreeMap;

const MINUTE_MS: i64 = 60_000;

struct FixtureFetcher;

impl SettingsFetcher for FixtureFetcher {
    fn name(&self) -> &str {
        "fixture"
    }

    fn fetch_market_settings(
        &self,
        _exchange: &str,
    ) -> Result<BTreeMap<String, MarketSettings>, DataError> {
        Ok(fixture_settings())
    }
}

struct DownFetcher;

impl SettingsFetcher for DownFetcher {
    fn name(&self) -> &str {
        "down"
    }

    fn fetch_market_settings(
        &self,
        _exchange: &str,
    ) -> Result<BTreeMap<String, MarketSettings>, DataError> {
        Err(DataError::NetworkUnreachable("fixture outage".into()))
    }
}

fn fixture_settings() -> BTreeMap<String, MarketSettings> {
    ["BTCUSDT", "ETHUSDT"]
        .iter()
        .map(|s| {
            (
                s.to_string(),
                MarketSettings {
                    qty_step: 0.001,
                    price_step: 0.1,
                    min_qty: 0.001,
                    min_cost: 5.0,
                    c_mult: 1.0,
                    maker: 0.0002,
                },
            )
        })
        .collect()
}

/// Triangle wave between 90 and 110: dips trigger grid entries, upswings
/// cross the close markup.
struct TriangleProvider;

impl CandleProvider for TriangleProvider {
    fn name(&self) -> &str {
        "triangle"
    }

    fn fetch_candles(
        &self,
        _symbol: &str,
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    ) -> Result<Vec<RawCandle>, DataError> {
        let start_ms = start.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
        let end_ms = end.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp_millis();
        let n = ((end_ms - start_ms) / MINUTE_MS) as usize;
        Ok((0..n)
            .map(|i| {
                let phase = (i % 400) as f64;
                let price = 90.0 + (phase - 200.0).abs() * 0.1;
                RawCandle {
                    timestamp_ms: start_ms + i as i64 * MINUTE_MS,
                    high: price + 0.5,
                    low: price - 0.5,
                    close: price,
                }
            })
            .collect())
    }
}

fn legacy_config() -> serde_json::Value {
    json!({
        "args": {
            "start_date": "2024-01-01",
            "end_date": "2024-01-02",
            "starting_balance": 10_000.0,
            "exchange": "binance",
            "symbols": ["BTCUSDT", "ETHUSDT"],
            "long_enabled": true,
            "short_enabled": true,
        },
        "live_config": {
            "global": {
                "TWE_long": 1.0,
                "TWE_short": 0.4,
                "loss_allowance_pct": 0.005,
                "stuck_threshold": 0.9,
            },
            "long": legacy_side(),
            "short": legacy_side(),
        },
    })
}

fn legacy_side() -> serde_json::Value {
    json!({
        "ddown_factor": 0.9,
        "initial_eprice_ema_dist": 0.0,
        "initial_qty_pct": 0.02,
        "markup_range": 0.01,
        "min_markup": 0.002,
        "rentry_pprice_dist": 0.03,
        "rentry_pprice_dist_wallet_exposure_weighting": 0.5,
        "ema_span_0": 120.0,
        "ema_span_1": 240.0,
        "n_close_orders": 1,
    })
}

/// Normalize the legacy fixture, then point its base_dir at the tempdir.
fn prepared_config(base_dir: &std::path::Path) -> serde_json::Value {
    let mut config = forager_core::config::normalize(&legacy_config()).unwrap();
    config.backtest.base_dir = base_dir.display().to_string();
    serde_json::to_value(config).unwrap()
}

#[test]
fn full_pipeline_writes_the_complete_artifact_set() {
    let dir = tempfile::tempdir().unwrap();
    let raw = prepared_config(dir.path());

    let run = run_forager(
        &raw,
        &FixtureFetcher,
        &TriangleProvider,
        &GridEngine,
        &BitmapRenderer::default(),
    )
    .unwrap();

    assert_eq!(run.settings_origin, SettingsOrigin::Remote);

    // Settings cache sits beside the run directories.
    let exchange_dir = dir.path().join("forager/binance");
    assert!(exchange_dir.join("market_specific_settings.json").exists());
    assert_eq!(run.run_dir.parent().unwrap(), exchange_dir);

    // Data artifacts.
    let analysis_path = run.run_dir.join("analysis.json");
    let config_path = run.run_dir.join("config.json");
    assert!(analysis_path.exists());
    assert!(config_path.exists());
    assert!(run.run_dir.join("fills.csv").exists());

    let analysis: BTreeMap<String, serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(&analysis_path).unwrap()).unwrap();
    assert!(analysis.contains_key("loss_profit_ratio_long"));
    assert!(analysis.contains_key("loss_profit_ratio_short"));
    assert!(analysis.contains_key("pnl_ratio_long_short"));
    assert!(analysis.contains_key("adg"));

    let persisted: Config =
        serde_json::from_str(&std::fs::read_to_string(&config_path).unwrap()).unwrap();
    assert_eq!(persisted, run.config);

    // Plot artifacts.
    assert!(run.run_dir.join("balance_and_equity.png").exists());
    assert!(run.run_dir.join("fills_plots/BTCUSDT.png").exists());
    assert!(run.run_dir.join("fills_plots/ETHUSDT.png").exists());

    // The triangle fixture trades.
    assert!(run.n_fills > 0);
}

#[test]
fn settings_outage_without_cache_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let raw = prepared_config(dir.path());

    let err = run_forager(
        &raw,
        &DownFetcher,
        &TriangleProvider,
        &GridEngine,
        &BitmapRenderer::default(),
    )
    .unwrap_err();

    let chain = format!("{err:#}");
    assert!(
        chain.contains("no market settings available online or cached"),
        "unexpected error chain: {chain}"
    );
}

#[test]
fn settings_outage_with_cache_falls_back_and_completes() {
    let dir = tempfile::tempdir().unwrap();
    let raw = prepared_config(dir.path());

    // Seed the cache exactly where the provisioner looks.
    let cache_path = forager_core::data::settings_cache_path(dir.path(), "binance");
    std::fs::create_dir_all(cache_path.parent().unwrap()).unwrap();
    std::fs::write(
        &cache_path,
        serde_json::to_string_pretty(&fixture_settings()).unwrap(),
    )
    .unwrap();

    let run = run_forager(
        &raw,
        &DownFetcher,
        &TriangleProvider,
        &GridEngine,
        &BitmapRenderer::default(),
    )
    .unwrap();

    assert_eq!(run.settings_origin, SettingsOrigin::Cached);
    assert!(run.run_dir.join("analysis.json").exists());
}
