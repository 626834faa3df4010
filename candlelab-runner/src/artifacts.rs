//! Run-directory artifacts: metrics.json, results.parquet, report.md, and
//! the resolved config echoed back as TOML.
//!
//! Each run gets its own timestamped directory under the artifacts root so
//! runs never overwrite each other.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use polars::prelude::*;

/// Lowercase, alphanumeric-and-underscore slug for directory names.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "run".to_string()
    } else {
        slug
    }
}

/// Create `root/YYYYMMDD_HHMMSS_<slug>` and return `(run_id, run_dir)`.
///
/// The directory is claimed with `create_dir`, so an existing dir is never
/// reused; runs started within the same second get an incrementing numeric
/// suffix instead.
pub fn make_run_dir(root: &Path, experiment: &str, now: DateTime<Utc>) -> Result<(String, PathBuf)> {
    fs::create_dir_all(root)
        .with_context(|| format!("failed to create artifacts root: {}", root.display()))?;

    let slug = slugify(experiment);
    let base = format!("{}_{}", now.format("%Y%m%d_%H%M%S"), slug);
    let mut attempt = 0u32;
    loop {
        let run_id = if attempt == 0 {
            base.clone()
        } else {
            format!("{base}_{attempt:03}")
        };
        let run_dir = root.join(&run_id);
        match fs::create_dir(&run_dir) {
            Ok(()) => return Ok((run_id, run_dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to create run dir: {}", run_dir.display())
                })
            }
        }
    }
}

// ─── Artifact writers ───────────────────────────────────────────────

pub fn write_metrics(run_dir: &Path, metrics: &serde_json::Value) -> Result<PathBuf> {
    let path = run_dir.join("metrics.json");
    let json =
        serde_json::to_string_pretty(metrics).context("failed to serialize metrics to JSON")?;
    fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn write_results(run_dir: &Path, results: &DataFrame) -> Result<PathBuf> {
    let path = run_dir.join("results.parquet");
    let mut df = results.clone();
    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn write_report_md(run_dir: &Path, report: &str) -> Result<PathBuf> {
    let path = run_dir.join("report.md");
    fs::write(&path, report).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

pub fn write_resolved_config(run_dir: &Path, config: &toml::Value) -> Result<PathBuf> {
    let path = run_dir.join("config.toml");
    let text =
        toml::to_string_pretty(config).context("failed to serialize resolved config to TOML")?;
    fs::write(&path, text).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}
