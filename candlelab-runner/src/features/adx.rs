//! Wilder DMI/ADX.
//!
//! Matches the TradingView-style `ta.dmi(len, adx_smoothing)` construction:
//! Wilder's RMA (SMA seed at index `len-1`, then recursive smoothing) over
//! true range and directional movement. Warm-up values are null.

use super::FeatureError;
use polars::prelude::*;

/// Wilder's RMA over a NaN-padded series.
///
/// The first defined value at index `length-1` is the mean of the non-NaN
/// samples among the first `length`; after that
/// `rma[i] = rma[i-1] + (x[i] - rma[i-1]) / length`, with NaN propagating.
fn wilder_rma(values: &[f64], length: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if length == 0 || values.len() < length {
        return out;
    }

    let head = &values[..length];
    let defined: Vec<f64> = head.iter().copied().filter(|v| !v.is_nan()).collect();
    if !defined.is_empty() {
        out[length - 1] = defined.iter().sum::<f64>() / defined.len() as f64;
    }

    for i in length..values.len() {
        let prev = out[i - 1];
        out[i] = if prev.is_nan() {
            f64::NAN
        } else {
            prev + (values[i] - prev) / length as f64
        };
    }
    out
}

fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    (0..high.len())
        .map(|i| {
            let hl = (high[i] - low[i]).abs();
            if i == 0 {
                return hl;
            }
            let pc = close[i - 1];
            hl.max((high[i] - pc).abs()).max((low[i] - pc).abs())
        })
        .collect()
}

/// Add `pdi`, `mdi`, and `adx` columns.
pub fn add_dmi_adx(
    df: &DataFrame,
    length: usize,
    adx_smoothing: usize,
) -> Result<DataFrame, FeatureError> {
    if length == 0 || adx_smoothing == 0 {
        return Err(FeatureError::InvalidParam(
            "length and adx_smoothing must be > 0".into(),
        ));
    }

    let col = |name: &str| -> Result<Vec<f64>, FeatureError> {
        Ok(df
            .column(name)
            .map_err(|_| FeatureError::MissingColumn(name.into()))?
            .f64()?
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    };
    let high = col("high")?;
    let low = col("low")?;
    let close = col("close")?;
    let n = high.len();

    let mut plus_dm = vec![0.0f64; n];
    let mut minus_dm = vec![0.0f64; n];
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let tr_rma = wilder_rma(&true_range(&high, &low, &close), length);
    let plus_rma = wilder_rma(&plus_dm, length);
    let minus_rma = wilder_rma(&minus_dm, length);

    let mut pdi = vec![f64::NAN; n];
    let mut mdi = vec![f64::NAN; n];
    let mut dx = vec![f64::NAN; n];
    for i in 0..n {
        // zero TR means a degenerate flat window; leave the ratio undefined
        if tr_rma[i] != 0.0 {
            pdi[i] = 100.0 * plus_rma[i] / tr_rma[i];
            mdi[i] = 100.0 * minus_rma[i] / tr_rma[i];
        }
        let denom = pdi[i] + mdi[i];
        if denom != 0.0 {
            dx[i] = 100.0 * (pdi[i] - mdi[i]).abs() / denom;
        }
    }

    let adx = wilder_rma(&dx, adx_smoothing);

    let mut out = df.clone();
    for (name, values) in [("pdi", pdi), ("mdi", mdi), ("adx", adx)] {
        let ca: Float64Chunked = values
            .iter()
            .map(|v| (!v.is_nan()).then_some(*v))
            .collect();
        out.with_column(ca.with_name(name.into()).into_series())?;
    }
    Ok(out)
}
