//! Pipeline smoke check: loads nothing, computes nothing clever. Reports
//! basic shape and time coverage so a broken data path fails loudly.

use super::{ExperimentError, ExperimentResult, RunContext};
use chrono::DateTime;
use polars::prelude::*;
use serde_json::json;

fn ts_bounds(df: &DataFrame) -> Result<(Option<String>, Option<String>), ExperimentError> {
    let ts = df.column("timestamp")?.cast(&DataType::Int64)?;
    let ca = ts.i64()?;
    let fmt = |ms: i64| {
        DateTime::from_timestamp_millis(ms)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| ms.to_string())
    };
    Ok((ca.min().map(fmt), ca.max().map(fmt)))
}

pub fn run(df: &DataFrame, ctx: &RunContext) -> Result<ExperimentResult, ExperimentError> {
    let (start_ts, end_ts) = ts_bounds(df)?;
    let n_rows = df.height();
    let n_cols = df.width();

    ctx.logger
        .info(&format!("smoke: {n_rows} rows x {n_cols} cols"));

    let metrics = json!({
        "experiment": "smoke",
        "run_id": ctx.run_id,
        "n_rows": n_rows,
        "n_cols": n_cols,
        "start_ts": start_ts,
        "end_ts": end_ts,
    });

    let results = df!(
        "n_rows" => [n_rows as i64],
        "n_cols" => [n_cols as i64],
        "start_ts" => [start_ts.clone().unwrap_or_default()],
        "end_ts" => [end_ts.clone().unwrap_or_default()],
    )?;

    let report_md = format!(
        "# Smoke check\n\n\
         Run: `{}`\n\n\
         - rows: {}\n\
         - columns: {}\n\
         - start: {}\n\
         - end: {}\n",
        ctx.run_id,
        n_rows,
        n_cols,
        start_ts.as_deref().unwrap_or("n/a"),
        end_ts.as_deref().unwrap_or("n/a"),
    );

    Ok(ExperimentResult {
        metrics,
        results: Some(results),
        report_md,
    })
}
