//! Timeframe label arithmetic.
//!
//! A timeframe label is `<positive integer><unit>` with unit `m` (minutes),
//! `h` (hours), or `d` (days). Bar-open timestamps are epoch milliseconds
//! everywhere in this crate, so the only conversion needed is label → ms.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TimeframeError {
    #[error("unsupported timeframe: {0:?}")]
    Unsupported(String),
}

/// Bar duration in milliseconds for a timeframe label like "15m", "1h", "2d".
pub fn duration_ms(timeframe: &str) -> Result<i64, TimeframeError> {
    let tf = timeframe.trim();
    if tf.len() < 2 {
        return Err(TimeframeError::Unsupported(timeframe.to_string()));
    }

    let (digits, unit) = tf.split_at(tf.len() - 1);
    let n: i64 = digits
        .parse()
        .map_err(|_| TimeframeError::Unsupported(timeframe.to_string()))?;
    if n <= 0 {
        return Err(TimeframeError::Unsupported(timeframe.to_string()));
    }

    match unit {
        "m" => Ok(n * 60_000),
        "h" => Ok(n * 3_600_000),
        "d" => Ok(n * 86_400_000),
        _ => Err(TimeframeError::Unsupported(timeframe.to_string())),
    }
}
