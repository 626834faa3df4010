//! Chunked OHLCV range fetching over an exchange client.
//!
//! The [`ExchangeClient`] trait is deliberately narrow — one operation —
//! so tests can substitute a deterministic fake without depending on a real
//! network client's surface. [`OhlcvFetcher`] walks a `[since, end)` range
//! in limit-sized chunks, retries failed chunks with linear backoff, and
//! normalizes the accumulated rows through the contract (non-strict).

use crate::contract::{self, ContractError, OhlcvContract};
use crate::log::Logger;
use crate::timeframe::{duration_ms, TimeframeError};
use polars::prelude::*;
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// One raw candle row as returned by an exchange: bar-open time in epoch
/// milliseconds plus OHLCV. No ordering or cleanliness is assumed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawBar {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode exchange response: {0}")]
    Decode(String),

    #[error("fetch failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error(transparent)]
    Timeframe(#[from] TimeframeError),

    #[error(transparent)]
    Contract(#[from] ContractError),
}

/// Narrow seam to the exchange: fetch up to `limit` bars from `since_ms`.
pub trait ExchangeClient {
    fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<RawBar>, FetchError>;
}

/// Retry/pacing policy for the chunked range loop.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Max bars per request.
    pub limit: usize,
    /// Sleep between successful chunks.
    pub rate_limit_ms: u64,
    /// Attempts per chunk before giving up.
    pub retries: u32,
    /// Linear backoff step: wait `retry_backoff_ms * attempt` after failure.
    pub retry_backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            limit: 1000,
            rate_limit_ms: 200,
            retries: 5,
            retry_backoff_ms: 500,
        }
    }
}

/// Chunked range fetcher with injected client and logger.
pub struct OhlcvFetcher<'a> {
    client: &'a dyn ExchangeClient,
    cfg: FetchConfig,
    logger: &'a dyn Logger,
}

impl<'a> OhlcvFetcher<'a> {
    pub fn new(client: &'a dyn ExchangeClient, cfg: FetchConfig, logger: &'a dyn Logger) -> Self {
        Self { client, cfg, logger }
    }

    /// Fetch `[start_ms, end_ms)` for one symbol/timeframe and return a
    /// contract-shaped table (non-strict normalization; the caller decides
    /// when to go strict). An empty range yields an empty table.
    pub fn fetch_range(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: Option<i64>,
    ) -> Result<DataFrame, FetchError> {
        let tf_ms = duration_ms(timeframe)?;
        let mut since = start_ms;
        let mut rows: Vec<RawBar> = Vec::new();
        let mut chunk = 0u32;

        self.logger.info(&format!(
            "fetch_range start: symbol={symbol} tf={timeframe} since={start_ms} end={end_ms:?} limit={}",
            self.cfg.limit
        ));

        loop {
            if let Some(end) = end_ms {
                if since >= end {
                    self.logger
                        .info(&format!("fetch_range stop: reached end ({since} >= {end})"));
                    break;
                }
            }

            chunk += 1;
            let batch = self.fetch_with_retries(symbol, timeframe, since)?;

            if batch.is_empty() {
                self.logger
                    .info(&format!("fetch_range stop: empty batch (chunk={chunk})"));
                break;
            }

            let last_open = batch.last().map(|b| b.ts_ms).unwrap_or(since);
            let got = batch.len();
            rows.extend(batch);

            self.logger.info(&format!(
                "chunk={chunk} since={since} got={got} last_open={last_open} total_rows={}",
                rows.len()
            ));

            let next_since = last_open + tf_ms;
            if next_since <= since {
                // Exchange returned non-increasing data; bail out rather
                // than loop forever.
                self.logger.warn(&format!(
                    "fetch_range stop: non-increasing next_since={next_since} since={since}"
                ));
                break;
            }
            since = next_since;

            if self.cfg.rate_limit_ms > 0 {
                thread::sleep(Duration::from_millis(self.cfg.rate_limit_ms));
            }
        }

        let df = rows_to_table(&rows)?;
        self.logger
            .info(&format!("fetch_range done: rows={}", df.height()));
        Ok(df)
    }

    fn fetch_with_retries(
        &self,
        symbol: &str,
        timeframe: &str,
        since: i64,
    ) -> Result<Vec<RawBar>, FetchError> {
        let mut last_err: Option<FetchError> = None;

        for attempt in 1..=self.cfg.retries {
            match self
                .client
                .fetch_ohlcv(symbol, timeframe, since, self.cfg.limit)
            {
                Ok(batch) => return Ok(batch),
                Err(e) => {
                    let wait_ms = self.cfg.retry_backoff_ms * u64::from(attempt);
                    self.logger.warn(&format!(
                        "fetch_ohlcv failed (attempt {attempt}/{}) since={since} tf={timeframe} symbol={symbol}: {e}; retry in {wait_ms}ms",
                        self.cfg.retries
                    ));
                    last_err = Some(e);
                    if attempt < self.cfg.retries && wait_ms > 0 {
                        thread::sleep(Duration::from_millis(wait_ms));
                    }
                }
            }
        }

        Err(FetchError::RetriesExhausted {
            attempts: self.cfg.retries,
            last: last_err.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

/// Convert raw rows to a contract-shaped table (non-strict).
fn rows_to_table(rows: &[RawBar]) -> Result<DataFrame, FetchError> {
    let df = df!(
        "timestamp" => rows.iter().map(|b| b.ts_ms).collect::<Vec<_>>(),
        "open" => rows.iter().map(|b| b.open).collect::<Vec<_>>(),
        "high" => rows.iter().map(|b| b.high).collect::<Vec<_>>(),
        "low" => rows.iter().map(|b| b.low).collect::<Vec<_>>(),
        "close" => rows.iter().map(|b| b.close).collect::<Vec<_>>(),
        "volume" => rows.iter().map(|b| b.volume).collect::<Vec<_>>(),
    )
    .map_err(ContractError::from)?;

    Ok(contract::validate(&df, &OhlcvContract::default(), false)?)
}
