//! Report & plot writer.
//!
//! Persists the merged analysis and the exact config under a timestamped
//! run directory, then renders the standard plots. The JSON artifacts are
//! written before any plotting starts, so a rendering failure aborts the
//! run with the data artifacts already durable.

use crate::analysis::BalanceEquity;
use crate::plot::PlotRenderer;
use anyhow::{Context, Result};
use forager_core::config::Config;
use forager_core::domain::Fill;
use forager_core::series::HlcSeries;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Artifact locations for a completed run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub analysis: BTreeMap<String, f64>,
}

/// Merge engine-native and analyzer metrics; engine values win on collision.
pub fn merge_metrics(
    engine_metrics: &BTreeMap<String, f64>,
    analyzer_metrics: &BTreeMap<String, f64>,
) -> BTreeMap<String, f64> {
    let mut merged = engine_metrics.clone();
    for (key, value) in analyzer_metrics {
        merged.entry(key.clone()).or_insert(*value);
    }
    merged
}

/// Persist all run artifacts under `<results_dir>/<timestamp>/`.
#[allow(clippy::too_many_arguments)]
pub fn write_report(
    config: &Config,
    engine_metrics: &BTreeMap<String, f64>,
    analyzer_metrics: &BTreeMap<String, f64>,
    bal_eq: &BalanceEquity,
    fills: &[Fill],
    hlcs: &HlcSeries,
    results_dir: &Path,
    renderer: &dyn PlotRenderer,
) -> Result<RunArtifacts> {
    let analysis = merge_metrics(engine_metrics, analyzer_metrics);

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H_%M_%S").to_string();
    let run_dir = results_dir.join(timestamp);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create run dir {}", run_dir.display()))?;

    write_json(&run_dir.join("analysis.json"), &analysis)?;
    // Round-trip through Value: the default serde_json map sorts keys.
    let config_value =
        serde_json::to_value(config).context("failed to serialize config")?;
    write_json(&run_dir.join("config.json"), &config_value)?;
    write_fills_csv(&run_dir.join("fills.csv"), fills)?;

    renderer
        .render_balance_and_equity(&run_dir.join("balance_and_equity.png"), bal_eq)
        .context("failed to render balance/equity plot")?;

    let plots_dir = run_dir.join("fills_plots");
    std::fs::create_dir_all(&plots_dir)
        .with_context(|| format!("failed to create plots dir {}", plots_dir.display()))?;
    for symbol in hlcs.symbols() {
        println!("Plotting fills for {symbol}");
        let closes = hlcs.closes(symbol).unwrap_or_default();
        let symbol_fills: Vec<&Fill> = fills.iter().filter(|f| &f.symbol == symbol).collect();
        renderer
            .render_fills(
                &plots_dir.join(format!("{symbol}.png")),
                symbol,
                &closes,
                &symbol_fills,
            )
            .with_context(|| format!("failed to render fills plot for {symbol}"))?;
    }

    Ok(RunArtifacts { run_dir, analysis })
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn write_fills_csv(path: &Path, fills: &[Fill]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    writer
        .write_record([
            "minute", "symbol", "type", "pnl", "fee_paid", "balance", "qty", "price", "psize",
            "pprice",
        ])
        .context("failed to write fills header")?;
    for fill in fills {
        writer
            .write_record([
                fill.minute.to_string(),
                fill.symbol.clone(),
                fill.label(),
                fill.pnl.to_string(),
                fill.fee_paid.to_string(),
                fill.balance.to_string(),
                fill.qty.to_string(),
                fill.price.to_string(),
                fill.psize.to_string(),
                fill.pprice.to_string(),
            ])
            .context("failed to write fill row")?;
    }
    writer.flush().context("failed to flush fills.csv")?;
    Ok(())
}
