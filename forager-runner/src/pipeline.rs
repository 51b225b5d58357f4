//! The single-pass pipeline: normalize → provision → rank → simulate →
//! analyze → write.
//!
//! Invoked once per process. Stages run strictly in order; the settings
//! fetch-or-cache resolves before candle provisioning starts, and nothing
//! is shared across concurrent callers.

use crate::analysis::analyze_fills;
use crate::invoke::run_backtest;
use crate::plot::PlotRenderer;
use crate::report::write_report;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use forager_core::config::{normalize, Config};
use forager_core::data::{
    ensure_market_settings, prepare_hlc_series, CandleCache, CandleProvider, SettingsFetcher,
    SettingsOrigin, StdoutProgress,
};
use forager_core::engine::BacktestEngine;
use forager_core::noisiness::{noisiness_argsort_indices, DEFAULT_WINDOW};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Outcome of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct ForagerRun {
    pub run_dir: PathBuf,
    pub analysis: BTreeMap<String, f64>,
    pub config: Config,
    pub n_fills: usize,
    pub settings_origin: SettingsOrigin,
}

/// Run the whole pipeline from a raw (possibly legacy) config document.
pub fn run_forager(
    raw_config: &serde_json::Value,
    settings_fetcher: &dyn SettingsFetcher,
    candle_provider: &dyn CandleProvider,
    engine: &dyn BacktestEngine,
    renderer: &dyn PlotRenderer,
) -> Result<ForagerRun> {
    let config = normalize(raw_config).context("config normalization failed")?;

    let base_dir = Path::new(&config.backtest.base_dir);
    let exchange = &config.backtest.exchange;
    let results_dir = base_dir.join("forager").join(exchange);

    let (mss, settings_origin) = ensure_market_settings(settings_fetcher, base_dir, exchange)
        .context("market settings provisioning failed")?;

    let start: NaiveDate = config
        .backtest
        .start_date
        .parse()
        .with_context(|| format!("invalid start_date '{}'", config.backtest.start_date))?;
    let end: NaiveDate = config
        .backtest
        .end_date
        .parse()
        .with_context(|| format!("invalid end_date '{}'", config.backtest.end_date))?;

    let cache = CandleCache::new(base_dir.join("candles").join(exchange));
    let hlcs = prepare_hlc_series(
        candle_provider,
        &cache,
        &config.approved_symbols,
        start,
        end,
        &StdoutProgress,
    )
    .context("candle provisioning failed")?;

    let noisiness_indices = noisiness_argsort_indices(&hlcs, DEFAULT_WINDOW);

    let output = run_backtest(engine, &hlcs, &noisiness_indices, &mss, &config)?;

    let started = Instant::now();
    let (analyzer_metrics, bal_eq) = analyze_fills(&output.fills, &output.equities);
    println!(
        "seconds elapsed for analysis: {:.4}",
        started.elapsed().as_secs_f64()
    );

    let n_fills = output.fills.len();
    let artifacts = write_report(
        &config,
        &output.metrics,
        &analyzer_metrics,
        &bal_eq,
        &output.fills,
        &hlcs,
        &results_dir,
        renderer,
    )?;

    Ok(ForagerRun {
        run_dir: artifacts.run_dir,
        analysis: artifacts.analysis,
        config,
        n_fills,
        settings_origin,
    })
}
