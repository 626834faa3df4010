//! Binance klines client.
//!
//! Public OHLCV via `/api/v3/klines` — no API key, no exchangeInfo
//! dependency. One call tries each configured base URL in order and
//! returns the last error if all fail; retry/backoff across calls lives in
//! [`crate::fetch::OhlcvFetcher`].

use crate::fetch::{ExchangeClient, FetchError, RawBar};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub base_urls: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            base_urls: vec![
                "https://api.binance.com".to_string(),
                "https://api1.binance.com".to_string(),
                "https://api2.binance.com".to_string(),
                "https://api3.binance.com".to_string(),
            ],
            timeout_secs: 30,
        }
    }
}

pub struct BinanceKlinesClient {
    client: reqwest::blocking::Client,
    cfg: BinanceConfig,
}

impl BinanceKlinesClient {
    pub fn new(cfg: BinanceConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .expect("failed to build HTTP client");
        Self { client, cfg }
    }

    /// Accept "BTC/USDT" and "BTCUSDT".
    fn normalize_symbol(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    fn request_klines(
        &self,
        base: &str,
        symbol: &str,
        interval: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawBar>, FetchError> {
        let url = format!("{base}/api/v3/klines");
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", interval.to_string()),
                ("startTime", since_ms.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let rows: Vec<Vec<Value>> = resp
            .json()
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        rows.iter().map(|row| parse_kline(row)).collect()
    }
}

impl ExchangeClient for BinanceKlinesClient {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawBar>, FetchError> {
        let sym = Self::normalize_symbol(symbol);
        let mut last_err = FetchError::Transport("no base URLs configured".into());

        for base in &self.cfg.base_urls {
            match self.request_klines(base, &sym, timeframe, since_ms, limit) {
                Ok(bars) => return Ok(bars),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }
}

/// One kline row: `[openTime, open, high, low, close, volume, ...]` where
/// prices and volume are decimal strings.
fn parse_kline(row: &[Value]) -> Result<RawBar, FetchError> {
    if row.len() < 6 {
        return Err(FetchError::Decode(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let ts_ms = row[0]
        .as_i64()
        .ok_or_else(|| FetchError::Decode(format!("non-integer open time: {}", row[0])))?;

    let field = |i: usize| -> Result<f64, FetchError> {
        match &row[i] {
            Value::String(s) => s
                .parse()
                .map_err(|_| FetchError::Decode(format!("bad decimal at field {i}: {s:?}"))),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| FetchError::Decode(format!("bad number at field {i}"))),
            other => Err(FetchError::Decode(format!(
                "unexpected value at field {i}: {other}"
            ))),
        }
    };

    Ok(RawBar {
        ts_ms,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
