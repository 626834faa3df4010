//! Incremental merge engine: decide the next fetch boundary, fold a fresh
//! batch into the stored table, and persist the union atomically.
//!
//! Re-running `incremental_update` for the same inputs converges: the
//! overlap window re-requests recently-closed bars, and the contract's
//! keep-last dedup lets fresh data overwrite stale data at equal
//! timestamps.

use crate::contract::{self, ContractError, OhlcvContract, REQUIRED_COLUMNS};
use crate::fetch::{FetchError, OhlcvFetcher};
use crate::log::Logger;
use crate::store::{ParquetStore, PathKey, StoreError};
use crate::timeframe::{duration_ms, TimeframeError};
use polars::prelude::*;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Timeframe(#[from] TimeframeError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Policy for one incremental update cycle.
#[derive(Debug, Clone)]
pub struct IncrementalConfig {
    /// Trailing bars intentionally re-fetched to absorb late corrections.
    pub overlap_bars: i64,
    /// Strictness of the merge validation (the final store write is always
    /// strict regardless).
    pub strict: bool,
    pub contract: OhlcvContract,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            overlap_bars: 200,
            strict: true,
            contract: OhlcvContract::default(),
        }
    }
}

/// Next fetch start in epoch milliseconds.
///
/// With no existing data this is `min_since_ms` (the caller's earliest
/// allowed start). Otherwise it backs off `overlap_bars` bars from the last
/// stored timestamp, clamped to never go negative and never earlier than
/// `min_since_ms`.
pub fn compute_since_ms(
    existing: Option<&DataFrame>,
    timeframe: &str,
    overlap_bars: i64,
    min_since_ms: i64,
) -> Result<i64, UpdateError> {
    let last_ms = match existing {
        Some(df) => ParquetStore::last_timestamp_ms(df)?,
        None => None,
    };
    let Some(last_ms) = last_ms else {
        return Ok(min_since_ms);
    };

    let overlap_ms = overlap_bars * duration_ms(timeframe)?;
    Ok(min_since_ms.max((last_ms - overlap_ms).max(0)))
}

/// Fold a fresh batch into the existing table and re-validate the union.
///
/// Existing rows are concatenated first, fresh rows second: the contract's
/// dedup keeps the later-positioned row, so fresh data always wins over
/// stale existing data at equal timestamps. Both sides are narrowed to the
/// contract columns so the schemas line up.
pub fn merge(
    existing: Option<&DataFrame>,
    fresh: &DataFrame,
    contract: &OhlcvContract,
    strict: bool,
) -> Result<DataFrame, UpdateError> {
    let existing = existing.filter(|df| df.height() > 0);
    let Some(existing) = existing else {
        return Ok(contract::validate(fresh, contract, strict)?);
    };

    let old = contract::validate(existing, contract, false)?;
    let new = contract::validate(fresh, contract, false)?;
    let mut combined = old.select(REQUIRED_COLUMNS)?;
    combined.vstack_mut(&new.select(REQUIRED_COLUMNS)?)?;

    Ok(contract::validate(&combined, contract, strict)?)
}

/// One fetch-merge-validate-write cycle for a key. Safe to re-run any
/// number of times: re-running with the same or a later `end_ms` converges
/// to the same or an extended table. A failed fetch propagates and leaves
/// the store exactly as it was.
#[allow(clippy::too_many_arguments)]
pub fn incremental_update(
    fetcher: &OhlcvFetcher,
    store: &ParquetStore,
    key: &PathKey,
    start_ms: i64,
    end_ms: Option<i64>,
    cfg: &IncrementalConfig,
    logger: &dyn Logger,
) -> Result<DataFrame, UpdateError> {
    let path = store.path_for(key)?;
    let existing = store.read_validated(&path, &cfg.contract)?;

    let since = compute_since_ms(
        existing.as_ref(),
        &key.timeframe,
        cfg.overlap_bars,
        start_ms,
    )?;

    logger.info(&format!(
        "incremental_update: path={} symbol={} tf={} since={since} end={end_ms:?} overlap_bars={}",
        path.display(),
        key.symbol,
        key.timeframe,
        cfg.overlap_bars
    ));

    let fresh = fetcher.fetch_range(&key.symbol, &key.timeframe, since, end_ms)?;
    let merged = merge(existing.as_ref(), &fresh, &cfg.contract, cfg.strict)?;
    store.write_atomic(&path, &merged, &cfg.contract)?;

    Ok(merged)
}
