//! Binance USD-M futures data fetchers.
//!
//! Implements both collaborator seams against the public fapi endpoints:
//! `exchangeInfo` for market-specific settings and 1m `klines` for HLC
//! candles. Handles rate limiting, retries with exponential backoff, and
//! response parsing.

use super::provider::{CandleProvider, DataError, RawCandle, SettingsFetcher};
use crate::domain::MarketSettings;
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// exchangeInfo does not expose fee tiers; the standard USD-M maker fee is
/// assumed for every symbol.
const DEFAULT_MAKER_FEE: f64 = 0.0002;

const KLINES_PAGE_LIMIT: u32 = 1500;

/// Binance USD-M futures `exchangeInfo` response (the parts we read).
#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    status: String,
    #[serde(default)]
    filters: Vec<SymbolFilter>,
}

#[derive(Debug, Deserialize)]
struct SymbolFilter {
    #[serde(rename = "filterType")]
    filter_type: String,
    #[serde(rename = "tickSize")]
    tick_size: Option<String>,
    #[serde(rename = "stepSize")]
    step_size: Option<String>,
    #[serde(rename = "minQty")]
    min_qty: Option<String>,
    notional: Option<String>,
}

/// Binance USD-M futures data fetcher.
pub struct BinanceFetcher {
    client: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    base_delay: Duration,
}

impl Default for BinanceFetcher {
    fn default() -> Self {
        Self::new("https://fapi.binance.com")
    }
}

impl BinanceFetcher {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into(),
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        }
    }

    fn exchange_info_url(&self) -> String {
        format!("{}/fapi/v1/exchangeInfo", self.base_url)
    }

    fn klines_url(&self, symbol: &str, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/fapi/v1/klines?symbol={symbol}&interval=1m\
             &startTime={start_ms}&endTime={end_ms}&limit={KLINES_PAGE_LIMIT}",
            self.base_url
        )
    }

    /// Execute a GET with retry and backoff, returning the response body.
    fn get_with_retry(&self, url: &str) -> Result<reqwest::blocking::Response, DataError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                std::thread::sleep(delay);
            }

            match self.client.get(url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        last_error = Some(DataError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if !status.is_success() {
                        last_error = Some(DataError::Other(format!("HTTP {status} for {url}")));
                        continue;
                    }

                    return Ok(resp);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(DataError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }

    fn parse_symbol_settings(info: SymbolInfo) -> Option<(String, MarketSettings)> {
        if info.status != "TRADING" {
            return None;
        }

        let mut settings = MarketSettings {
            qty_step: 0.0,
            price_step: 0.0,
            min_qty: 0.0,
            min_cost: 0.0,
            c_mult: 1.0,
            maker: DEFAULT_MAKER_FEE,
        };

        for filter in info.filters {
            match filter.filter_type.as_str() {
                "PRICE_FILTER" => {
                    settings.price_step = parse_decimal(filter.tick_size.as_deref())?;
                }
                "LOT_SIZE" => {
                    settings.qty_step = parse_decimal(filter.step_size.as_deref())?;
                    settings.min_qty = parse_decimal(filter.min_qty.as_deref())?;
                }
                "MIN_NOTIONAL" => {
                    settings.min_cost = parse_decimal(filter.notional.as_deref())?;
                }
                _ => {}
            }
        }

        if settings.qty_step <= 0.0 || settings.price_step <= 0.0 {
            return None;
        }

        Some((info.symbol, settings))
    }

    fn parse_kline_row(row: &[Value]) -> Result<RawCandle, DataError> {
        let timestamp_ms = row
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| DataError::ResponseFormatChanged("kline open time missing".into()))?;
        let high = parse_price(row.get(2))?;
        let low = parse_price(row.get(3))?;
        let close = parse_price(row.get(4))?;
        Ok(RawCandle {
            timestamp_ms,
            high,
            low,
            close,
        })
    }
}

fn parse_decimal(value: Option<&str>) -> Option<f64> {
    value.and_then(|s| s.parse::<f64>().ok())
}

/// Binance encodes kline prices as decimal strings.
fn parse_price(value: Option<&Value>) -> Result<f64, DataError> {
    value
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| DataError::ResponseFormatChanged("kline price field missing".into()))
}

impl SettingsFetcher for BinanceFetcher {
    fn name(&self) -> &str {
        "binance_futures"
    }

    fn fetch_market_settings(
        &self,
        exchange: &str,
    ) -> Result<BTreeMap<String, MarketSettings>, DataError> {
        if !exchange.starts_with("binance") {
            return Err(DataError::Other(format!(
                "unsupported exchange '{exchange}' (this fetcher serves binance)"
            )));
        }

        let resp = self.get_with_retry(&self.exchange_info_url())?;
        let info: ExchangeInfo = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse exchangeInfo: {e}"))
        })?;

        let settings: BTreeMap<String, MarketSettings> = info
            .symbols
            .into_iter()
            .filter_map(Self::parse_symbol_settings)
            .collect();

        if settings.is_empty() {
            return Err(DataError::ResponseFormatChanged(
                "exchangeInfo contained no tradable symbols".into(),
            ));
        }

        Ok(settings)
    }
}

impl CandleProvider for BinanceFetcher {
    fn name(&self) -> &str {
        "binance_futures"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawCandle>, DataError> {
        let start_ms = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| DataError::ValidationError(format!("invalid start date {start}")))?;
        let end_ms = end
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp_millis())
            .ok_or_else(|| DataError::ValidationError(format!("invalid end date {end}")))?;

        let mut candles: Vec<RawCandle> = Vec::new();
        let mut cursor = start_ms;

        // Page forward until the range is exhausted or a page comes back
        // short (no more data).
        while cursor < end_ms {
            let url = self.klines_url(symbol, cursor, end_ms - 1);
            let resp = self.get_with_retry(&url)?;
            let rows: Vec<Vec<Value>> = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse klines: {e}"))
            })?;

            if rows.is_empty() {
                break;
            }

            let page_len = rows.len();
            for row in &rows {
                let candle = Self::parse_kline_row(row)?;
                if candle.timestamp_ms >= end_ms {
                    break;
                }
                candles.push(candle);
            }

            let last_ts = candles
                .last()
                .map(|c| c.timestamp_ms)
                .unwrap_or(cursor);
            if page_len < KLINES_PAGE_LIMIT as usize || last_ts < cursor {
                break;
            }
            cursor = last_ts + 60_000;
        }

        if candles.is_empty() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        Ok(candles)
    }
}
