//! Market data acquisition: settings fetch with cache fallback, 1m-candle
//! download with a per-symbol Parquet cache, and multi-symbol provisioning.

pub mod binance;
pub mod candles;
pub mod hlc_cache;
pub mod provider;
pub mod settings;

pub use binance::BinanceFetcher;
pub use candles::prepare_hlc_series;
pub use hlc_cache::{CandleCache, CandleCacheMeta};
pub use provider::{
    CandleProvider, DataError, FetchProgress, RawCandle, SettingsFetcher, StdoutProgress,
};
pub use settings::{ensure_market_settings, settings_cache_path, SettingsOrigin};
