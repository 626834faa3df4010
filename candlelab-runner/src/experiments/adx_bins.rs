//! Conditional forward returns by ADX regime.
//!
//! Bars are bucketed by trend strength (ADX level), trend persistence
//! (ADX rising vs falling over a lookback), and DI direction, then forward
//! returns are aggregated per bucket and horizon into a tidy table.

use super::{ExperimentError, ExperimentResult, RunContext};
use crate::features::{add_dmi_adx, add_forward_returns};
use polars::prelude::*;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdxBinsParams {
    pub dmi_length: usize,
    pub adx_smoothing: usize,
    pub horizons: Vec<usize>,
    pub slope_lookback: usize,
    pub adx_bins: usize,
    /// "quantile" or "fixed"
    pub binning: String,
    pub adx_th_low: f64,
    pub adx_th_high: f64,
}

impl Default for AdxBinsParams {
    fn default() -> Self {
        Self {
            dmi_length: 14,
            adx_smoothing: 14,
            horizons: vec![1, 3, 6, 12, 24],
            slope_lookback: 3,
            adx_bins: 3,
            binning: "quantile".into(),
            adx_th_low: 20.0,
            adx_th_high: 25.0,
        }
    }
}

/// Linear-interpolation quantile of an already-sorted slice.
fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Quantile bin edges with duplicate edges dropped, so a heavily tied
/// distribution collapses into fewer bins rather than producing empty ones.
fn quantile_edges(values: &[f64], bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let min = sorted[0];
    let mut edges = Vec::new();
    for i in 1..bins {
        let e = quantile_sorted(&sorted, i as f64 / bins as f64);
        // an edge equal to the lower boundary (including the minimum)
        // would create an empty bin; drop it
        if e > edges.last().copied().unwrap_or(min) {
            edges.push(e);
        }
    }
    edges
}

fn bin_label(adx: f64, edges: &[f64]) -> String {
    let idx = edges.iter().filter(|e| adx > **e).count();
    format!("q{}", idx + 1)
}

fn fixed_label(adx: f64, th_low: f64, th_high: f64) -> &'static str {
    if adx < th_low {
        "low"
    } else if adx < th_high {
        "mid"
    } else {
        "high"
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

struct GroupStats {
    n: usize,
    mean: f64,
    median: f64,
    hit_rate: f64,
    mean_abs: f64,
    mean_dir: f64,
    median_dir: f64,
    hit_rate_dir: f64,
}

/// Per-group stats over (forward return, DI direction) samples. The `_dir`
/// variants evaluate the directional trade: return times sign(+DI - -DI).
fn group_stats(samples: &[(f64, i32)]) -> GroupStats {
    let n = samples.len();
    let mut rets: Vec<f64> = samples.iter().map(|(r, _)| *r).collect();
    let mut dirs: Vec<f64> = samples.iter().map(|(r, d)| r * *d as f64).collect();

    let mean = rets.iter().sum::<f64>() / n as f64;
    let mean_abs = rets.iter().map(|r| r.abs()).sum::<f64>() / n as f64;
    let hit_rate = rets.iter().filter(|r| **r > 0.0).count() as f64 / n as f64;
    let mean_dir = dirs.iter().sum::<f64>() / n as f64;
    let hit_rate_dir = dirs.iter().filter(|r| **r > 0.0).count() as f64 / n as f64;

    GroupStats {
        n,
        mean,
        median: median(&mut rets),
        hit_rate,
        mean_abs,
        mean_dir,
        median_dir: median(&mut dirs),
        hit_rate_dir,
    }
}

pub fn run(df: &DataFrame, ctx: &RunContext) -> Result<ExperimentResult, ExperimentError> {
    let params: AdxBinsParams = ctx
        .params
        .clone()
        .try_into()
        .map_err(|e| ExperimentError::Params(e.to_string()))?;
    if params.horizons.is_empty() {
        return Err(ExperimentError::Params("horizons must be non-empty".into()));
    }
    if params.adx_bins == 0 || params.slope_lookback == 0 {
        return Err(ExperimentError::Params(
            "adx_bins and slope_lookback must be > 0".into(),
        ));
    }

    let featured = add_dmi_adx(df, params.dmi_length, params.adx_smoothing)?;
    let featured = add_forward_returns(&featured, &params.horizons)?;
    let n_rows = featured.height();

    let opt_col = |name: &str| -> Result<Vec<Option<f64>>, ExperimentError> {
        Ok(featured.column(name)?.f64()?.iter().collect())
    };
    let adx = opt_col("adx")?;
    let pdi = opt_col("pdi")?;
    let mdi = opt_col("mdi")?;

    let max_h = *params.horizons.iter().max().unwrap();
    let tail_ret = opt_col(&format!("fwd_ret_{max_h}"))?;

    // Trend strength edges come from the defined ADX values only.
    let defined_adx: Vec<f64> = adx.iter().flatten().copied().collect();
    let edges = match params.binning.as_str() {
        "quantile" => {
            if defined_adx.is_empty() {
                return Err(ExperimentError::Params(
                    "no defined adx values; input too short for quantile binning".into(),
                ));
            }
            Some(quantile_edges(&defined_adx, params.adx_bins))
        }
        "fixed" => None,
        other => {
            return Err(ExperimentError::Params(format!(
                "unknown binning {other:?} (expected \"quantile\" or \"fixed\")"
            )))
        }
    };

    // Per-row labels; None rows are excluded from every group.
    let mut valid = 0usize;
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for i in 0..n_rows {
        let (Some(a), Some(_), Some(_)) = (adx[i], pdi[i], mdi[i]) else {
            continue;
        };
        if i < params.slope_lookback || tail_ret[i].is_none() {
            continue;
        }
        let Some(past) = adx[i - params.slope_lookback] else {
            continue;
        };
        let slope = if a > past { "rising" } else { "falling" };
        let bin = match &edges {
            Some(edges) => bin_label(a, edges),
            None => fixed_label(a, params.adx_th_low, params.adx_th_high).to_string(),
        };
        valid += 1;
        groups.entry((bin, slope.to_string())).or_default().push(i);
    }

    // Tidy output: one row per (adx_bin, adx_slope, horizon).
    let mut col_bin = Vec::new();
    let mut col_slope = Vec::new();
    let mut col_h = Vec::new();
    let mut col_n = Vec::new();
    let mut col_mean = Vec::new();
    let mut col_median = Vec::new();
    let mut col_hit = Vec::new();
    let mut col_mean_abs = Vec::new();
    let mut col_mean_dir = Vec::new();
    let mut col_median_dir = Vec::new();
    let mut col_hit_dir = Vec::new();

    for ((bin, slope), rows) in &groups {
        for &h in &params.horizons {
            let ret = opt_col(&format!("fwd_ret_{h}"))?;
            let samples: Vec<(f64, i32)> = rows
                .iter()
                .filter_map(|&i| {
                    let r = ret[i]?;
                    let dir = if pdi[i]? > mdi[i]? { 1 } else { -1 };
                    Some((r, dir))
                })
                .collect();
            if samples.is_empty() {
                continue;
            }
            let s = group_stats(&samples);
            col_bin.push(bin.clone());
            col_slope.push(slope.clone());
            col_h.push(h as i64);
            col_n.push(s.n as i64);
            col_mean.push(s.mean);
            col_median.push(s.median);
            col_hit.push(s.hit_rate);
            col_mean_abs.push(s.mean_abs);
            col_mean_dir.push(s.mean_dir);
            col_median_dir.push(s.median_dir);
            col_hit_dir.push(s.hit_rate_dir);
        }
    }

    let results = df!(
        "adx_bin" => col_bin,
        "adx_slope" => col_slope,
        "horizon" => col_h,
        "n" => col_n,
        "mean" => col_mean,
        "median" => col_median,
        "hit_rate" => col_hit,
        "mean_abs" => col_mean_abs,
        "mean_dir" => col_mean_dir,
        "median_dir" => col_median_dir,
        "hit_rate_dir" => col_hit_dir,
    )?;

    ctx.logger.info(&format!(
        "adx_bins: {valid}/{n_rows} bars usable, {} groups",
        groups.len()
    ));

    let metrics = json!({
        "experiment": "adx_bins",
        "run_id": ctx.run_id,
        "n_rows": n_rows,
        "n_valid": valid,
        "n_groups": groups.len(),
        "params": {
            "dmi_length": params.dmi_length,
            "adx_smoothing": params.adx_smoothing,
            "horizons": params.horizons,
            "slope_lookback": params.slope_lookback,
            "adx_bins": params.adx_bins,
            "binning": params.binning,
        },
    });

    let report_md = render_report(&ctx.run_id, valid, n_rows, &results)?;

    Ok(ExperimentResult {
        metrics,
        results: Some(results),
        report_md,
    })
}

fn render_report(
    run_id: &str,
    valid: usize,
    n_rows: usize,
    results: &DataFrame,
) -> Result<String, ExperimentError> {
    let mut md = format!(
        "# ADX regime bins\n\nRun: `{run_id}`\n\nUsable bars: {valid} of {n_rows}\n\n\
         | bin | slope | horizon | n | mean | hit_rate | mean_dir | hit_rate_dir |\n\
         |---|---|---|---|---|---|---|---|\n"
    );
    let bins = results.column("adx_bin")?.str()?;
    let slopes = results.column("adx_slope")?.str()?;
    let horizons = results.column("horizon")?.i64()?;
    let ns = results.column("n")?.i64()?;
    let means = results.column("mean")?.f64()?;
    let hits = results.column("hit_rate")?.f64()?;
    let mean_dirs = results.column("mean_dir")?.f64()?;
    let hit_dirs = results.column("hit_rate_dir")?.f64()?;
    for i in 0..results.height() {
        md.push_str(&format!(
            "| {} | {} | {} | {} | {:.5} | {:.3} | {:.5} | {:.3} |\n",
            bins.get(i).unwrap_or(""),
            slopes.get(i).unwrap_or(""),
            horizons.get(i).unwrap_or(0),
            ns.get(i).unwrap_or(0),
            means.get(i).unwrap_or(f64::NAN),
            hits.get(i).unwrap_or(f64::NAN),
            mean_dirs.get(i).unwrap_or(f64::NAN),
            hit_dirs.get(i).unwrap_or(f64::NAN),
        ));
    }
    Ok(md)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candlelab_core::log::NoopLogger;
    use chrono::Utc;
    use std::path::PathBuf;

    fn ctx(params: toml::Value) -> RunContext<'static> {
        RunContext {
            run_id: "test_adx_bins".into(),
            run_dir: PathBuf::from("/tmp"),
            params,
            logger: &NoopLogger,
            started_at: Utc::now(),
        }
    }

    fn trending_frame(n: usize) -> DataFrame {
        // zig-zag drift upward so TR and DM are non-degenerate
        let close: Vec<f64> = (0..n)
            .map(|i| 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect();
        let high: Vec<f64> = close.iter().map(|c| c + 1.0).collect();
        let low: Vec<f64> = close.iter().map(|c| c - 1.0).collect();
        let open: Vec<f64> = close.iter().map(|c| c - 0.1).collect();
        let ts: Vec<i64> = (0..n as i64).map(|i| i * 3_600_000).collect();
        let vol = vec![1.0f64; n];
        df!(
            "timestamp" => ts, "open" => open, "high" => high,
            "low" => low, "close" => close, "volume" => vol,
        )
        .unwrap()
    }

    #[test]
    fn default_params_deserialize_from_empty_table() {
        let p: AdxBinsParams = toml::Value::Table(Default::default()).try_into().unwrap();
        assert_eq!(p.dmi_length, 14);
        assert_eq!(p.binning, "quantile");
    }

    #[test]
    fn quantile_edges_drop_duplicates() {
        let edges = quantile_edges(&[5.0; 100], 3);
        assert!(edges.is_empty());

        let vals: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let edges = quantile_edges(&vals, 4);
        assert_eq!(edges.len(), 3);
        assert!(edges[0] < edges[1] && edges[1] < edges[2]);

        // heavy tie at the minimum: the first quantile collapses onto the
        // min and must be dropped, later distinct edges survive
        let edges = quantile_edges(&[1.0, 1.0, 1.0, 1.0, 2.0, 3.0], 3);
        assert_eq!(edges.len(), 1);
        assert!(edges[0] > 1.0);
    }

    #[test]
    fn fixed_labels_respect_thresholds() {
        assert_eq!(fixed_label(10.0, 20.0, 25.0), "low");
        assert_eq!(fixed_label(22.0, 20.0, 25.0), "mid");
        assert_eq!(fixed_label(30.0, 20.0, 25.0), "high");
    }

    #[test]
    fn produces_tidy_rows_per_group_and_horizon() {
        let df = trending_frame(300);
        let mut table = toml::value::Table::new();
        table.insert("horizons".into(), toml::Value::Array(vec![1.into(), 3.into()]));
        let ctx = ctx(toml::Value::Table(table));

        let out = run(&df, &ctx).unwrap();
        let results = out.results.unwrap();

        assert!(results.height() > 0);
        let horizons = results.column("horizon").unwrap().i64().unwrap();
        assert!(horizons.iter().flatten().all(|h| h == 1 || h == 3));
        assert!(out.metrics["n_valid"].as_u64().unwrap() > 0);
        assert!(out.report_md.contains("| bin |"));
    }

    #[test]
    fn unknown_binning_is_rejected() {
        let df = trending_frame(100);
        let mut table = toml::value::Table::new();
        table.insert("binning".into(), toml::Value::String("weird".into()));
        let ctx = ctx(toml::Value::Table(table));
        assert!(matches!(run(&df, &ctx), Err(ExperimentError::Params(_))));
    }
}
