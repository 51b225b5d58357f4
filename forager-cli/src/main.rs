//! Forager CLI — run a multi-asset forager backtest from a config file.
//!
//! One positional argument: the config path. The document may be in the
//! canonical layout or the legacy nested layout; it is normalized before
//! the pipeline runs.

use anyhow::{Context, Result};
use clap::Parser;
use forager_core::config::load_config_document;
use forager_core::data::BinanceFetcher;
use forager_core::engine::GridEngine;
use forager_runner::{run_forager, BitmapRenderer, ForagerRun};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "forager", about = "Run a multi-asset forager backtest")]
struct Cli {
    /// Path to a forager config (canonical or legacy layout).
    config_path: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let raw = load_config_document(&cli.config_path)
        .with_context(|| format!("failed to load config {}", cli.config_path.display()))?;

    let fetcher = BinanceFetcher::default();
    let engine = GridEngine;
    let renderer = BitmapRenderer::default();

    let run = run_forager(&raw, &fetcher, &fetcher, &engine, &renderer)?;

    print_summary(&run);
    Ok(())
}

fn print_summary(run: &ForagerRun) {
    println!();
    println!("=== Forager Backtest Result ===");
    println!("Exchange:       {}", run.config.backtest.exchange);
    println!(
        "Period:         {} to {}",
        run.config.backtest.start_date, run.config.backtest.end_date
    );
    println!("Symbols:        {}", run.config.approved_symbols.len());
    println!("Fills:          {}", run.n_fills);
    println!();
    println!("--- Analysis ---");
    for (key, value) in &run.analysis {
        println!("{key:<32} {value:.6}");
    }
    println!();
    println!("Artifacts saved to: {}", run.run_dir.display());
}
