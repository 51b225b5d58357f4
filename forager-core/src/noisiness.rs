//! Per-timestep symbol ranking by "noisiness" — a rolling mean of the
//! normalized range `(high - low) / close`.
//!
//! The engine consumes the ranking to decide which symbols to prioritize
//! when it has fewer position slots than approved symbols.

use crate::series::HlcSeries;

/// Rolling window, in minutes, over which the normalized range is averaged.
pub const DEFAULT_WINDOW: usize = 60;

/// Rolling-mean normalized range per timestep and symbol.
///
/// During warmup (fewer than `window` observations) the mean is taken over
/// what has been seen so far.
pub fn noisiness(series: &HlcSeries, window: usize) -> Vec<Vec<f64>> {
    let n_steps = series.n_steps();
    let n_symbols = series.n_symbols();
    let window = window.max(1);

    let mut out = vec![vec![0.0; n_symbols]; n_steps];
    let mut sums = vec![0.0; n_symbols];
    let mut ranges = vec![vec![0.0; n_symbols]; n_steps];

    for step in 0..n_steps {
        for sym in 0..n_symbols {
            let hlc = series.get(step, sym);
            let range = if hlc.close != 0.0 {
                (hlc.high - hlc.low) / hlc.close
            } else {
                0.0
            };
            ranges[step][sym] = range;
            sums[sym] += range;
            if step >= window {
                sums[sym] -= ranges[step - window][sym];
            }
            let denom = (step + 1).min(window) as f64;
            out[step][sym] = sums[sym] / denom;
        }
    }

    out
}

/// Per-timestep symbol indices ordered most-noisy-first.
///
/// Ties break on the lower symbol index so the ordering is deterministic.
pub fn noisiness_argsort_indices(series: &HlcSeries, window: usize) -> Vec<Vec<u32>> {
    noisiness(series, window)
        .into_iter()
        .map(|row| {
            let mut indices: Vec<u32> = (0..row.len() as u32).collect();
            indices.sort_by(|&a, &b| {
                row[b as usize]
                    .partial_cmp(&row[a as usize])
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.cmp(&b))
            });
            indices
        })
        .collect()
}
