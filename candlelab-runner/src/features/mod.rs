//! Pure feature transforms over contract-shaped tables.

pub mod adx;
pub mod returns;

pub use adx::add_dmi_adx;
pub use returns::add_forward_returns;

use polars::prelude::PolarsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("missing required column {0:?}")]
    MissingColumn(String),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}
