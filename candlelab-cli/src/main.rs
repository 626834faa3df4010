//! candlelab CLI — data acquisition and experiment commands.
//!
//! Commands:
//! - `fetch` — incrementally update the parquet store from the exchange
//! - `validate` — audit stored parquet files against the OHLCV contract
//! - `sample` — generate deterministic sample data
//! - `run` — execute an experiment from a TOML config

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use candlelab_core::binance::{BinanceConfig, BinanceKlinesClient};
use candlelab_core::contract::{validate, OhlcvContract};
use candlelab_core::timeframe::duration_ms;
use candlelab_core::{
    incremental_update, FetchConfig, IncrementalConfig, OhlcvFetcher, ParquetStore, PathKey,
    StdoutLogger,
};
use candlelab_runner::{run_experiment, sample, RunConfig};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use polars::prelude::*;
use serde_json::json;

#[derive(Parser)]
#[command(name = "candlelab", about = "candlelab CLI — OHLCV data and experiments")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Incrementally fetch all configured symbol/timeframe pairs.
    Fetch {
        /// Path to a TOML run config.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Audit stored parquet files: contract validity, coverage, gaps.
    Validate {
        /// Root of the parquet store to audit.
        #[arg(long, default_value = "data/raw")]
        raw_dir: PathBuf,

        /// Apply strict OHLC sanity checks.
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate deterministic sample data.
    Sample {
        /// Output parquet path.
        #[arg(long, default_value = "data/sample/sample_1h.parquet")]
        out: PathBuf,

        #[arg(long, default_value_t = 2000)]
        rows: usize,

        #[arg(long, default_value = "1h")]
        timeframe: String,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Execute an experiment from a TOML config.
    Run {
        /// Path to a TOML run config.
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Override the experiment named in the config.
        #[arg(long)]
        experiment: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch { config } => run_fetch(&config),
        Commands::Validate {
            raw_dir,
            strict,
            out,
        } => run_validate(&raw_dir, strict, out.as_deref()),
        Commands::Sample {
            out,
            rows,
            timeframe,
            seed,
        } => run_sample(&out, rows, &timeframe, seed),
        Commands::Run { config, experiment } => run_run(&config, experiment),
    }
}

fn run_fetch(config_path: &Path) -> Result<()> {
    let cfg = RunConfig::load(config_path)?;
    let logger = StdoutLogger;

    let client = BinanceKlinesClient::new(BinanceConfig::default());
    let fetch_cfg = FetchConfig {
        limit: cfg.fetch.limit,
        rate_limit_ms: cfg.fetch.rate_limit_ms,
        retries: cfg.fetch.retries,
        retry_backoff_ms: cfg.fetch.retry_backoff_ms,
    };
    let fetcher = OhlcvFetcher::new(&client, fetch_cfg, &logger);
    let store = ParquetStore::new(cfg.storage.root.clone());
    let inc_cfg = IncrementalConfig {
        overlap_bars: cfg.fetch.overlap_bars,
        ..IncrementalConfig::default()
    };

    let mut failures = Vec::new();
    for symbol in &cfg.data_source.symbols {
        for timeframe in &cfg.data_source.timeframes {
            let key = PathKey::new(&cfg.data_source.venue, &cfg.data_source.market, symbol, timeframe);
            match incremental_update(
                &fetcher,
                &store,
                &key,
                cfg.data_source.start_ms,
                None,
                &inc_cfg,
                &logger,
            ) {
                Ok(df) => println!("{symbol} {timeframe}: {} bars stored", df.height()),
                Err(e) => {
                    eprintln!("{symbol} {timeframe}: {e}");
                    failures.push(format!("{symbol}/{timeframe}"));
                }
            }
        }
    }

    if !failures.is_empty() {
        eprintln!("failed: {}", failures.join(", "));
        std::process::exit(1);
    }
    Ok(())
}

// ─── validate command ───────────────────────────────────────────────

fn collect_parquet_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            collect_parquet_files(&path, out)?;
        } else if path.extension().is_some_and(|e| e == "parquet") {
            out.push(path);
        }
    }
    Ok(())
}

fn fmt_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

/// Per-file audit: validity plus grid coverage when the timeframe can be
/// inferred from the file stem (e.g. `1h.parquet`).
fn audit_file(path: &Path, strict: bool) -> serde_json::Value {
    let read = fs::File::open(path)
        .map_err(anyhow::Error::from)
        .and_then(|f| ParquetReader::new(f).finish().map_err(Into::into))
        .and_then(|df| {
            validate(&df, &OhlcvContract::default(), strict).map_err(Into::into)
        });

    let df = match read {
        Ok(df) => df,
        Err(e) => {
            return json!({
                "path": path.display().to_string(),
                "ok": false,
                "error": format!("{e:#}"),
            })
        }
    };

    let mut report = json!({
        "path": path.display().to_string(),
        "ok": true,
        "rows": df.height(),
    });

    let ts: Vec<i64> = match df
        .column("timestamp")
        .and_then(|c| c.cast(&DataType::Int64))
    {
        Ok(c) => c.i64().map(|ca| ca.iter().flatten().collect()).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    let (Some(&first), Some(&last)) = (ts.first(), ts.last()) else {
        return report;
    };
    report["start_ts"] = json!(fmt_ms(first));
    report["end_ts"] = json!(fmt_ms(last));

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let Ok(tf_ms) = duration_ms(stem) else {
        return report;
    };
    let expected = (last - first) / tf_ms + 1;
    let missing = expected - ts.len() as i64;
    let max_gap_bars = ts
        .windows(2)
        .map(|w| (w[1] - w[0]) / tf_ms - 1)
        .max()
        .unwrap_or(0);

    report["timeframe"] = json!(stem);
    report["expected_rows"] = json!(expected);
    report["missing_rows"] = json!(missing);
    report["missing_ratio"] = json!(missing as f64 / expected as f64);
    report["max_gap_bars"] = json!(max_gap_bars);
    report
}

fn run_validate(raw_dir: &Path, strict: bool, out: Option<&Path>) -> Result<()> {
    let mut files = Vec::new();
    collect_parquet_files(raw_dir, &mut files)?;
    files.sort();

    let audits: Vec<serde_json::Value> = files.iter().map(|p| audit_file(p, strict)).collect();
    let failed = audits.iter().filter(|a| a["ok"] == false).count();

    let report = json!({
        "root": raw_dir.display().to_string(),
        "strict": strict,
        "checked": audits.len(),
        "failed": failed,
        "files": audits,
    });
    let text = serde_json::to_string_pretty(&report)?;
    match out {
        Some(path) => fs::write(path, &text)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{text}"),
    }

    if failed > 0 {
        eprintln!("{failed} of {} files failed validation", audits.len());
        std::process::exit(1);
    }
    Ok(())
}

fn run_sample(out: &Path, rows: usize, timeframe: &str, seed: u64) -> Result<()> {
    let df = sample::generate(rows, timeframe, 1_577_836_800_000, seed)?;
    sample::write_sample(out, &df)?;
    println!("wrote {} rows to {}", df.height(), out.display());
    Ok(())
}

fn run_run(config_path: &Path, experiment: Option<String>) -> Result<()> {
    let mut cfg = RunConfig::load(config_path)?;
    if let Some(name) = experiment {
        cfg.experiment.name = name;
    }
    let run_dir = run_experiment(&cfg, &StdoutLogger)?;
    println!("artifacts: {}", run_dir.display());
    Ok(())
}
