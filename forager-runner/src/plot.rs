//! Plot rendering behind a seam.
//!
//! The writer only knows the [`PlotRenderer`] trait; the default
//! implementation draws PNGs with plotters' bitmap backend.

use crate::analysis::BalanceEquity;
use anyhow::{anyhow, Result};
use forager_core::domain::{Fill, FillKind};
use plotters::prelude::*;
use std::path::Path;

/// Renders the standard charts for a run.
pub trait PlotRenderer: Send + Sync {
    /// Aggregate balance/equity chart.
    fn render_balance_and_equity(&self, path: &Path, table: &BalanceEquity) -> Result<()>;

    /// Per-symbol chart: close-price panel with entry/close markers.
    fn render_fills(
        &self,
        path: &Path,
        symbol: &str,
        closes: &[f64],
        fills: &[&Fill],
    ) -> Result<()>;
}

/// PNG renderer on plotters' bitmap backend.
pub struct BitmapRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for BitmapRenderer {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl PlotRenderer for BitmapRenderer {
    fn render_balance_and_equity(&self, path: &Path, table: &BalanceEquity) -> Result<()> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("chart fill: {e}"))?;

        if table.is_empty() {
            return root.present().map_err(|e| anyhow!("chart present: {e}"));
        }

        let x_min = *table.minutes.first().expect("checked non-empty");
        let x_max = *table.minutes.last().expect("checked non-empty");
        let (y_min, y_max) = padded_bounds(table.balance.iter().chain(table.equity.iter()));

        let mut chart = ChartBuilder::on(&root)
            .caption("Balance and equity", ("sans-serif", 32))
            .margin(16)
            .x_label_area_size(48)
            .y_label_area_size(72)
            .build_cartesian_2d(x_min..x_max.max(x_min + 1), y_min..y_max)
            .map_err(|e| anyhow!("chart build: {e}"))?;
        chart
            .configure_mesh()
            .x_desc("minute")
            .draw()
            .map_err(|e| anyhow!("chart mesh: {e}"))?;

        chart
            .draw_series(LineSeries::new(
                table.minutes.iter().zip(&table.balance).map(|(&m, &v)| (m, v)),
                &BLUE,
            ))
            .map_err(|e| anyhow!("balance series: {e}"))?
            .label("balance")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLUE));
        chart
            .draw_series(LineSeries::new(
                table.minutes.iter().zip(&table.equity).map(|(&m, &v)| (m, v)),
                &RED,
            ))
            .map_err(|e| anyhow!("equity series: {e}"))?
            .label("equity")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &RED));

        chart
            .configure_series_labels()
            .background_style(&WHITE)
            .border_style(&BLACK)
            .draw()
            .map_err(|e| anyhow!("chart legend: {e}"))?;

        root.present().map_err(|e| anyhow!("chart present: {e}"))
    }

    fn render_fills(
        &self,
        path: &Path,
        symbol: &str,
        closes: &[f64],
        fills: &[&Fill],
    ) -> Result<()> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE).map_err(|e| anyhow!("chart fill: {e}"))?;

        if closes.is_empty() {
            return root.present().map_err(|e| anyhow!("chart present: {e}"));
        }

        let (y_min, y_max) =
            padded_bounds(closes.iter().chain(fills.iter().map(|f| &f.price)));
        let x_max = closes.len() as i64;

        let mut chart = ChartBuilder::on(&root)
            .caption(format!("Fills {symbol}"), ("sans-serif", 32))
            .margin(16)
            .x_label_area_size(48)
            .y_label_area_size(72)
            .build_cartesian_2d(0i64..x_max, y_min..y_max)
            .map_err(|e| anyhow!("chart build: {e}"))?;
        chart
            .configure_mesh()
            .x_desc("minute")
            .y_desc("price")
            .draw()
            .map_err(|e| anyhow!("chart mesh: {e}"))?;

        chart
            .draw_series(LineSeries::new(
                closes.iter().enumerate().map(|(i, &c)| (i as i64, c)),
                &BLACK,
            ))
            .map_err(|e| anyhow!("close series: {e}"))?
            .label("close")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &BLACK));

        let entries = fills
            .iter()
            .filter(|f| matches!(f.kind, FillKind::EntryInitial | FillKind::EntryGrid));
        chart
            .draw_series(
                entries.map(|f| TriangleMarker::new((f.minute, f.price), 6, GREEN.filled())),
            )
            .map_err(|e| anyhow!("entry markers: {e}"))?
            .label("entry")
            .legend(|(x, y)| TriangleMarker::new((x + 10, y), 6, GREEN.filled()));

        let closes_markers = fills.iter().filter(|f| f.kind == FillKind::CloseGrid);
        chart
            .draw_series(closes_markers.map(|f| Circle::new((f.minute, f.price), 5, RED.filled())))
            .map_err(|e| anyhow!("close markers: {e}"))?
            .label("close fill")
            .legend(|(x, y)| Circle::new((x + 10, y), 5, RED.filled()));

        chart
            .configure_series_labels()
            .background_style(&WHITE)
            .border_style(&BLACK)
            .draw()
            .map_err(|e| anyhow!("chart legend: {e}"))?;

        root.present().map_err(|e| anyhow!("chart present: {e}"))
    }
}

/// Y-axis bounds with a small margin; degenerate ranges get a unit spread.
fn padded_bounds<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_finite() {
            min = min.min(v);
            max = max.max(v);
        }
    }
    if !min.is_finite() || !max.is_finite() {
        return (0.0, 1.0);
    }
    let pad = ((max - min) * 0.05).max(1e-9);
    (min - pad, max + pad)
}
