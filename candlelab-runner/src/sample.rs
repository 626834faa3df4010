//! Deterministic sample OHLCV data for demos and offline test runs.
//!
//! A seeded geometric random walk; highs and lows bracket the open/close so
//! the generated table always passes strict validation.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use candlelab_core::contract::{validate, OhlcvContract};
use candlelab_core::timeframe::duration_ms;
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Generate `n` contract-valid bars starting at `start_ms`, spaced by
/// `timeframe`. Same seed, same data.
pub fn generate(n: usize, timeframe: &str, start_ms: i64, seed: u64) -> Result<DataFrame> {
    let tf_ms = duration_ms(timeframe).context("bad sample timeframe")?;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut ts = Vec::with_capacity(n);
    let mut open = Vec::with_capacity(n);
    let mut high = Vec::with_capacity(n);
    let mut low = Vec::with_capacity(n);
    let mut close = Vec::with_capacity(n);
    let mut volume = Vec::with_capacity(n);

    let mut price = 100.0f64;
    for i in 0..n {
        let o = price;
        let drift = rng.gen_range(-0.01..0.0105);
        let c = (o * (1.0 + drift)).max(0.01);
        let wick_up: f64 = rng.gen_range(0.0..0.005);
        let wick_down: f64 = rng.gen_range(0.0..0.005);
        let h = o.max(c) * (1.0 + wick_up);
        let l = (o.min(c) * (1.0 - wick_down)).max(0.001);

        ts.push(start_ms + i as i64 * tf_ms);
        open.push(o);
        high.push(h);
        low.push(l);
        close.push(c);
        volume.push(rng.gen_range(10.0..1000.0));
        price = c;
    }

    let df = df!(
        "timestamp" => ts,
        "open" => open,
        "high" => high,
        "low" => low,
        "close" => close,
        "volume" => volume,
    )?;
    let df = validate(&df, &OhlcvContract::default(), true)?;
    Ok(df)
}

/// Write a sample table as parquet, creating parent directories.
pub fn write_sample(path: &Path, df: &DataFrame) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        fs::File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
