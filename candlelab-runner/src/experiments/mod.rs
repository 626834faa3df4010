//! Experiment registry and the context/result types every experiment
//! shares. Experiments are pure functions over an already-validated table;
//! all I/O (loading data, persisting artifacts) happens in the runner.

pub mod adx_bins;
pub mod smoke;

use crate::features::FeatureError;
use candlelab_core::log::Logger;
use chrono::{DateTime, Utc};
use polars::prelude::*;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("unknown experiment {name:?}. Available: {available}")]
    UnknownExperiment { name: String, available: String },

    #[error("bad experiment params: {0}")]
    Params(String),

    #[error(transparent)]
    Feature(#[from] FeatureError),

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Immutable context passed to experiments.
pub struct RunContext<'a> {
    /// e.g. "20260113_142233_adx_bins"
    pub run_id: String,
    /// Directory where this run's artifacts will be written.
    pub run_dir: PathBuf,
    /// The `[experiment.params]` table from the run config.
    pub params: toml::Value,
    pub logger: &'a dyn Logger,
    pub started_at: DateTime<Utc>,
}

/// Standardized experiment output.
pub struct ExperimentResult {
    /// Scalar metrics, serialized to metrics.json.
    pub metrics: serde_json::Value,
    /// Optional tabular result, persisted as results.parquet.
    pub results: Option<DataFrame>,
    /// Markdown report content, saved as report.md.
    pub report_md: String,
}

pub type ExperimentFn = fn(&DataFrame, &RunContext) -> Result<ExperimentResult, ExperimentError>;

const EXPERIMENTS: [(&str, ExperimentFn); 2] = [("smoke", smoke::run), ("adx_bins", adx_bins::run)];

/// Look up an experiment by name; the error lists what is available.
pub fn get_experiment(name: &str) -> Result<ExperimentFn, ExperimentError> {
    EXPERIMENTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
        .ok_or_else(|| ExperimentError::UnknownExperiment {
            name: name.to_string(),
            available: EXPERIMENTS
                .iter()
                .map(|(n, _)| *n)
                .collect::<Vec<_>>()
                .join(", "),
        })
}
