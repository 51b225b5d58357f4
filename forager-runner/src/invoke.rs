//! Backtest invoker — translates the canonical config into engine-shaped
//! argument structures and delegates to the engine.
//!
//! Symbols are sorted and deduplicated here, and everything positional
//! (exchange params, the params' symbol list) is derived from that one
//! sorted list. `run_backtest` additionally checks the list against the
//! series' own symbol axis, so a mismatch fails loudly instead of silently
//! corrupting the simulation.

use forager_core::config::Config;
use forager_core::domain::MarketSettings;
use forager_core::engine::{
    BacktestEngine, BacktestParams, BotParams, BotParamsPair, EngineError, EngineOutput,
    ExchangeParams,
};
use forager_core::series::HlcSeries;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("config has no approved symbols")]
    NoSymbols,

    #[error("no market settings for symbol '{symbol}'")]
    MissingSettings { symbol: String },

    #[error("series symbol axis does not match prepared symbols: {series:?} vs {prepared:?}")]
    SymbolAxisMismatch {
        series: Vec<String>,
        prepared: Vec<String>,
    },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Assemble engine arguments from the canonical config and settings.
///
/// The returned exchange params align index-for-index with the returned
/// `BacktestParams::symbols` (sorted, deduplicated). The maker fee is taken
/// from the first sorted symbol's settings — fees are assumed uniform
/// across symbols.
pub fn prep_backtest_args(
    config: &Config,
    mss: &BTreeMap<String, MarketSettings>,
) -> Result<(BotParamsPair, Vec<ExchangeParams>, BacktestParams), InvokeError> {
    let symbols: Vec<String> = config
        .approved_symbols
        .iter()
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect();
    let first = symbols.first().ok_or(InvokeError::NoSymbols)?;

    let bot_params = BotParamsPair {
        long: BotParams::from_side_params(&config.long),
        short: BotParams::from_side_params(&config.short),
    };

    let exchange_params: Vec<ExchangeParams> = symbols
        .iter()
        .map(|symbol| {
            mss.get(symbol)
                .map(ExchangeParams::from)
                .ok_or_else(|| InvokeError::MissingSettings {
                    symbol: symbol.clone(),
                })
        })
        .collect::<Result<_, _>>()?;

    let maker_fee = mss
        .get(first)
        .map(|s| s.maker)
        .ok_or_else(|| InvokeError::MissingSettings {
            symbol: first.clone(),
        })?;

    let backtest_params = BacktestParams {
        starting_balance: config.backtest.starting_balance,
        maker_fee,
        symbols,
    };

    Ok((bot_params, exchange_params, backtest_params))
}

/// Prepare arguments and run the engine over the series.
pub fn run_backtest(
    engine: &dyn BacktestEngine,
    hlcs: &HlcSeries,
    noisiness_indices: &[Vec<u32>],
    mss: &BTreeMap<String, MarketSettings>,
    config: &Config,
) -> Result<EngineOutput, InvokeError> {
    let (bot_params, exchange_params, backtest_params) = prep_backtest_args(config, mss)?;

    if hlcs.symbols() != backtest_params.symbols.as_slice() {
        return Err(InvokeError::SymbolAxisMismatch {
            series: hlcs.symbols().to_vec(),
            prepared: backtest_params.symbols.clone(),
        });
    }

    println!("Starting backtest...");
    let started = Instant::now();
    let output = engine.run(
        hlcs,
        noisiness_indices,
        &bot_params,
        &exchange_params,
        &backtest_params,
    )?;
    println!(
        "seconds elapsed for backtest: {:.4}",
        started.elapsed().as_secs_f64()
    );
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(maker: f64, min_cost: f64) -> MarketSettings {
        MarketSettings {
            qty_step: 0.001,
            price_step: 0.1,
            min_qty: 0.001,
            min_cost,
            c_mult: 1.0,
            maker,
        }
    }

    fn mss_for(symbols: &[&str]) -> BTreeMap<String, MarketSettings> {
        symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.to_string(), settings(0.0002, 5.0 + i as f64)))
            .collect()
    }

    fn config_with_symbols(symbols: &[&str]) -> Config {
        let mut config = Config::template();
        config.approved_symbols = symbols.iter().map(|s| s.to_string()).collect();
        config.long.n_positions = symbols.len();
        config.short.n_positions = symbols.len();
        config
    }

    #[test]
    fn exchange_params_align_with_sorted_symbols_for_any_permutation() {
        let symbols = ["ETHUSDT", "BTCUSDT", "XRPUSDT", "ADAUSDT"];
        let mss = mss_for(&symbols);

        let permutations = [
            vec!["ETHUSDT", "BTCUSDT", "XRPUSDT", "ADAUSDT"],
            vec!["XRPUSDT", "ADAUSDT", "ETHUSDT", "BTCUSDT"],
            vec!["ADAUSDT", "XRPUSDT", "BTCUSDT", "ETHUSDT"],
        ];

        for perm in &permutations {
            let config = config_with_symbols(perm);
            let (_, exchange_params, backtest_params) =
                prep_backtest_args(&config, &mss).unwrap();

            assert_eq!(
                backtest_params.symbols,
                vec!["ADAUSDT", "BTCUSDT", "ETHUSDT", "XRPUSDT"]
            );
            for (i, symbol) in backtest_params.symbols.iter().enumerate() {
                let expected = ExchangeParams::from(&mss[symbol]);
                assert_eq!(exchange_params[i], expected, "index {i} must be {symbol}");
            }
        }
    }

    #[test]
    fn duplicate_symbols_collapse() {
        let mss = mss_for(&["BTCUSDT"]);
        let config = config_with_symbols(&["BTCUSDT", "BTCUSDT"]);

        let (_, exchange_params, backtest_params) = prep_backtest_args(&config, &mss).unwrap();
        assert_eq!(backtest_params.symbols, vec!["BTCUSDT"]);
        assert_eq!(exchange_params.len(), 1);
    }

    #[test]
    fn maker_fee_comes_from_first_sorted_symbol() {
        let mut mss = mss_for(&["BTCUSDT", "ETHUSDT"]);
        mss.get_mut("BTCUSDT").unwrap().maker = 0.00123;
        // Listed out of order; BTCUSDT sorts first.
        let config = config_with_symbols(&["ETHUSDT", "BTCUSDT"]);

        let (_, _, backtest_params) = prep_backtest_args(&config, &mss).unwrap();
        assert_eq!(backtest_params.maker_fee, 0.00123);
    }

    #[test]
    fn wallet_exposure_limit_guards_zero_positions() {
        let mss = mss_for(&["BTCUSDT"]);
        let mut config = config_with_symbols(&["BTCUSDT"]);
        config.long.total_wallet_exposure_limit = 2.0;
        config.long.n_positions = 4;
        config.short.total_wallet_exposure_limit = 1.0;
        config.short.n_positions = 0;

        let (bot_params, _, _) = prep_backtest_args(&config, &mss).unwrap();
        assert_eq!(bot_params.long.wallet_exposure_limit, 0.5);
        assert_eq!(bot_params.short.wallet_exposure_limit, 0.0);
    }

    #[test]
    fn missing_settings_for_a_symbol_is_an_error() {
        let mss = mss_for(&["BTCUSDT"]);
        let config = config_with_symbols(&["BTCUSDT", "ETHUSDT"]);

        let err = prep_backtest_args(&config, &mss).unwrap_err();
        assert!(matches!(err, InvokeError::MissingSettings { ref symbol } if symbol == "ETHUSDT"));
    }

    #[test]
    fn empty_symbol_list_is_an_error() {
        let mss = mss_for(&["BTCUSDT"]);
        let config = config_with_symbols(&[]);

        assert!(matches!(
            prep_backtest_args(&config, &mss),
            Err(InvokeError::NoSymbols)
        ));
    }
}
