//! candlelab-core — OHLCV data contract, parquet store, and incremental
//! merge engine.
//!
//! The pipeline: an [`fetch::ExchangeClient`] produces raw candle batches,
//! [`contract::validate`] normalizes them against the OHLCV contract,
//! [`store::ParquetStore`] persists tables atomically per
//! (venue, market, symbol, timeframe) key, and [`merge`] folds fresh
//! batches into the stored state so repeated overlapping fetches converge
//! idempotently.

pub mod binance;
pub mod contract;
pub mod fetch;
pub mod log;
pub mod merge;
pub mod store;
pub mod timeframe;

pub use contract::{validate, ContractError, OhlcvContract, REQUIRED_COLUMNS};
pub use fetch::{ExchangeClient, FetchConfig, FetchError, OhlcvFetcher, RawBar};
pub use log::{Logger, NoopLogger, StdoutLogger};
pub use merge::{compute_since_ms, incremental_update, merge, IncrementalConfig, UpdateError};
pub use store::{ParquetStore, PathKey, StoreError};
pub use timeframe::{duration_ms, TimeframeError};
