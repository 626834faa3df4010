//! Parquet-backed columnar store, one file per (venue, market, symbol,
//! timeframe) key.
//!
//! Layout: `{root}/{venue}/{market}/{SYMBOL}/{timeframe}.parquet`
//!
//! Writes are atomic (write to `.tmp`, rename into place) and always pass
//! strict contract validation first: the store never persists invalid data,
//! even if an upstream step ran non-strict. Concurrent writers to the same
//! path are not coordinated here; the last atomic replace wins, so callers
//! must serialize access per key.

use crate::contract::{self, ContractError, OhlcvContract, REQUIRED_COLUMNS};
use crate::timeframe::{duration_ms, TimeframeError};
use polars::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Timeframe(#[from] TimeframeError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Addressing key for one stored table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathKey {
    pub venue: String,
    /// "spot" | "perp"
    pub market: String,
    /// "BTC/USDT" or "BTCUSDT"
    pub symbol: String,
    /// "15m", "1h", ...
    pub timeframe: String,
}

impl PathKey {
    pub fn new(venue: &str, market: &str, symbol: &str, timeframe: &str) -> Self {
        Self {
            venue: venue.to_string(),
            market: market.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
        }
    }

    /// "BTC/USDT" -> "BTCUSDT"
    pub fn normalized_symbol(&self) -> String {
        self.symbol.replace('/', "").to_uppercase()
    }
}

/// The parquet store rooted at a raw-data directory.
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic file path for a key. Rejects a malformed timeframe
    /// before touching the filesystem, then creates parent directories
    /// (idempotent).
    pub fn path_for(&self, key: &PathKey) -> Result<PathBuf, StoreError> {
        let tf = key.timeframe.to_lowercase();
        duration_ms(&tf)?;

        let dir = self
            .root
            .join(&key.venue)
            .join(&key.market)
            .join(key.normalized_symbol());
        fs::create_dir_all(&dir).map_err(|e| StoreError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(dir.join(format!("{tf}.parquet")))
    }

    /// Read the stored table verbatim, or `None` if no file exists.
    pub fn read(&self, path: &Path) -> Result<Option<DataFrame>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let file = fs::File::open(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let df = ParquetReader::new(file).finish()?;
        Ok(Some(df))
    }

    /// As `read`, but run the result through the contract non-strict so
    /// callers always see contract-shaped data. Tolerant of legacy files
    /// where timestamps were stored as raw epoch milliseconds.
    pub fn read_validated(
        &self,
        path: &Path,
        contract: &OhlcvContract,
    ) -> Result<Option<DataFrame>, StoreError> {
        match self.read(path)? {
            None => Ok(None),
            Some(df) => Ok(Some(contract::validate(&df, contract, false)?)),
        }
    }

    /// Maximum timestamp in epoch milliseconds, or `None` for an empty
    /// table. Coerces the column first; a prior format may not have
    /// normalized it yet.
    pub fn last_timestamp_ms(df: &DataFrame) -> Result<Option<i64>, StoreError> {
        if df.height() == 0 {
            return Ok(None);
        }
        let ts = contract::ensure_utc_timestamp(df.column("timestamp")?)?;
        let ms = ts.cast(&DataType::Int64)?;
        Ok(ms.i64()?.max())
    }

    /// Validate strictly, narrow to the contract columns, and atomically
    /// replace the file at `path`. On any failure before the final rename
    /// the prior file is left completely untouched.
    ///
    /// Extra columns are dropped here (not in `validate`) so every stored
    /// file carries exactly the six contract columns.
    pub fn write_atomic(
        &self,
        path: &Path,
        df: &DataFrame,
        contract: &OhlcvContract,
    ) -> Result<(), StoreError> {
        let validated = contract::validate(df, contract, true)?;
        let narrowed = validated.select(REQUIRED_COLUMNS)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let tmp = path.with_extension("parquet.tmp");
        write_parquet(&narrowed, &tmp)?;
        fs::rename(&tmp, path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        })?;
        Ok(())
    }
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    ParquetWriter::new(file).finish(&mut df.clone())?;
    Ok(())
}
