//! Forward simple returns: `fwd_ret_h = close[i+h] / close[i] - 1`.

use super::FeatureError;
use polars::prelude::*;

/// Add one `fwd_ret_{h}` column per horizon. The last `h` rows of each
/// column are null (no future close to look at).
pub fn add_forward_returns(
    df: &DataFrame,
    horizons: &[usize],
) -> Result<DataFrame, FeatureError> {
    if horizons.is_empty() {
        return Err(FeatureError::InvalidParam("horizons must be non-empty".into()));
    }
    if let Some(h) = horizons.iter().find(|h| **h == 0) {
        return Err(FeatureError::InvalidParam(format!("invalid horizon: {h}")));
    }

    let close = df
        .column("close")
        .map_err(|_| FeatureError::MissingColumn("close".into()))?
        .f64()?;
    let closes: Vec<Option<f64>> = close.iter().collect();
    let n = closes.len();

    let mut out = df.clone();
    for &h in horizons {
        let values: Float64Chunked = (0..n)
            .map(|i| {
                let now = closes.get(i).copied().flatten()?;
                let future = closes.get(i + h).copied().flatten()?;
                if now == 0.0 {
                    return None;
                }
                Some(future / now - 1.0)
            })
            .collect();
        out.with_column(
            values
                .with_name(format!("fwd_ret_{h}").into())
                .into_series(),
        )?;
    }
    Ok(out)
}
