//! Experiment orchestration: load data, dispatch the experiment, persist
//! artifacts into a fresh run directory.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use candlelab_core::contract::{validate, OhlcvContract};
use candlelab_core::log::Logger;
use chrono::Utc;
use polars::prelude::*;

use crate::artifacts;
use crate::config::RunConfig;
use crate::experiments::{get_experiment, RunContext};

/// Run the configured experiment end to end and return its run directory.
///
/// The input parquet is re-validated (non-strict) on load, so an experiment
/// never sees an unsorted or duplicated table even if the file on disk
/// predates the current contract.
pub fn run_experiment(cfg: &RunConfig, logger: &dyn Logger) -> Result<PathBuf> {
    let started_at = Utc::now();
    let name = cfg.experiment.name.as_str();
    // resolve the experiment before touching the filesystem, so a typo in
    // the config does not leave an empty run dir behind
    let experiment = get_experiment(name)?;

    let file = fs::File::open(&cfg.data.input_path)
        .with_context(|| format!("failed to open input {}", cfg.data.input_path.display()))?;
    let raw = ParquetReader::new(file)
        .finish()
        .with_context(|| format!("failed to read input {}", cfg.data.input_path.display()))?;
    let df = validate(&raw, &OhlcvContract::default(), false)
        .with_context(|| format!("input {} failed validation", cfg.data.input_path.display()))?;

    let (run_id, run_dir) = artifacts::make_run_dir(&cfg.artifacts.root, name, started_at)?;
    logger.info(&format!(
        "run {run_id}: experiment={name} rows={} input={}",
        df.height(),
        cfg.data.input_path.display()
    ));

    let ctx = RunContext {
        run_id: run_id.clone(),
        run_dir: run_dir.clone(),
        params: toml::Value::Table(cfg.experiment.params.clone()),
        logger,
        started_at,
    };
    let mut result = experiment(&df, &ctx).with_context(|| format!("experiment {name} failed"))?;

    if let Some(obj) = result.metrics.as_object_mut() {
        obj.insert(
            "config_fingerprint".to_string(),
            serde_json::Value::String(cfg.fingerprint()),
        );
        let elapsed = (Utc::now() - started_at).num_milliseconds();
        obj.insert("duration_ms".to_string(), serde_json::json!(elapsed));
    }

    artifacts::write_metrics(&run_dir, &result.metrics)?;
    if let Some(results) = &result.results {
        artifacts::write_results(&run_dir, results)?;
    }
    artifacts::write_report_md(&run_dir, &result.report_md)?;
    artifacts::write_resolved_config(&run_dir, &cfg.as_toml()?)?;

    logger.info(&format!("run {run_id}: artifacts in {}", run_dir.display()));
    Ok(run_dir)
}
