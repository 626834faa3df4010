//! The OHLCV data contract: a declarative schema plus the `validate`
//! normalizer that turns an arbitrary raw table into a contract-compliant
//! one, or rejects it.
//!
//! Normalized tables carry exactly these guarantees:
//! - `timestamp` is `Datetime(Milliseconds)` with UTC semantics (naive == UTC)
//! - `open/high/low/close/volume` are `Float64`
//! - rows sorted ascending by `timestamp`, at most one row per timestamp
//!   (last occurrence in input order wins)
//! - `low <= min(open, close)`, `high >= max(open, close)`, `low <= high`
//! - `volume >= 0` wherever volume is present
//!
//! Extra columns are passed through untouched; they are not part of the
//! contract's guarantee. The store narrows to the required columns at write
//! time.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use thiserror::Error;

/// Columns every contract-compliant table must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

const PRICE_COLUMNS: [&str; 4] = ["open", "high", "low", "close"];

/// Immutable validation configuration. Shared read-only across calls.
#[derive(Debug, Clone)]
pub struct OhlcvContract {
    pub required_columns: Vec<String>,
    pub strict_ohlc_sanity: bool,
    pub require_sorted: bool,
    pub require_unique_ts: bool,
}

impl Default for OhlcvContract {
    fn default() -> Self {
        Self {
            required_columns: REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            strict_ohlc_sanity: true,
            require_sorted: true,
            require_unique_ts: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("OHLCV table is empty")]
    EmptyInput,

    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("OHLC sanity violated for {0} rows")]
    OhlcSanityViolation(usize),

    #[error("negative volume for {0} rows")]
    NegativeVolume(usize),

    #[error("timestamp is not sorted strictly ascending")]
    NotSorted,

    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Normalize `df` against `contract`, or reject it.
///
/// Strict mode raises on every rule violation. Non-strict mode is the
/// explicit escape hatch for tolerant reads: empty input yields an empty
/// contract-shaped table, missing columns return the input unchanged, and
/// sanity violations are left in the output uncorrected.
///
/// The input is never mutated; a new table is returned.
pub fn validate(
    df: &DataFrame,
    contract: &OhlcvContract,
    strict: bool,
) -> Result<DataFrame, ContractError> {
    if df.height() == 0 {
        if strict {
            return Err(ContractError::EmptyInput);
        }
        return Ok(empty_table(contract));
    }

    let schema = df.schema();
    let missing: Vec<String> = contract
        .required_columns
        .iter()
        .filter(|name| !schema.contains(name.as_str()))
        .cloned()
        .collect();
    if !missing.is_empty() {
        if strict {
            return Err(ContractError::MissingColumns(missing));
        }
        return Ok(df.clone());
    }

    let mut out = df.clone();

    let ts = ensure_utc_timestamp(out.column("timestamp")?)?;
    out.with_column(ts)?;
    for name in PRICE_COLUMNS.iter().chain(std::iter::once(&"volume")) {
        let coerced = coerce_numeric(out.column(name)?)?;
        out.with_column(coerced)?;
    }

    // Rows missing a timestamp or any price are dropped silently; volume
    // nulls are retained and only checked for negativity when present.
    let keep = out.column("timestamp")?.is_not_null()
        & out.column("open")?.is_not_null()
        & out.column("high")?.is_not_null()
        & out.column("low")?.is_not_null()
        & out.column("close")?.is_not_null();
    let out = out.filter(&keep)?;

    let mut lf = out.lazy().sort(
        ["timestamp"],
        SortMultipleOptions::default().with_maintain_order(true),
    );
    if contract.require_unique_ts {
        // Stable sort above keeps equal timestamps in input order, so
        // keeping the last occurrence is exactly the "later row wins"
        // tie-break that resolves overlap corrections.
        lf = lf.unique_stable(Some(vec!["timestamp".into()]), UniqueKeepStrategy::Last);
    }
    let out = lf.collect()?;

    if contract.strict_ohlc_sanity {
        // Both counts are computed before either error fires so messages
        // always report exact violation counts.
        let (ohlc_bad, neg_vol) = count_violations(&out)?;
        if strict && ohlc_bad > 0 {
            return Err(ContractError::OhlcSanityViolation(ohlc_bad));
        }
        if strict && neg_vol > 0 {
            return Err(ContractError::NegativeVolume(neg_vol));
        }
    }

    if strict && contract.require_sorted && !is_strictly_increasing(&out)? {
        return Err(ContractError::NotSorted);
    }

    Ok(out)
}

/// Empty table shaped to the contract's required columns.
fn empty_table(contract: &OhlcvContract) -> DataFrame {
    let fields = contract.required_columns.iter().map(|name| {
        let dtype = if name == "timestamp" {
            DataType::Datetime(TimeUnit::Milliseconds, None)
        } else {
            DataType::Float64
        };
        Field::new(name.as_str().into(), dtype)
    });
    DataFrame::empty_with_schema(&Schema::from_iter(fields))
}

/// Coerce a timestamp column to `Datetime(Milliseconds)` (UTC semantics).
///
/// Numeric values are epoch milliseconds; strings are parsed with chrono,
/// timezone-naive values treated as UTC; unparseable values become null.
pub(crate) fn ensure_utc_timestamp(column: &Column) -> PolarsResult<Column> {
    let target = DataType::Datetime(TimeUnit::Milliseconds, None);
    match column.dtype() {
        DataType::Datetime(_, _) | DataType::Date => column.cast(&target),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => column.cast(&DataType::Int64)?.cast(&target),
        DataType::Float32 | DataType::Float64 => {
            let ca = column.cast(&DataType::Float64)?;
            let ca = ca.f64()?;
            let ms: Int64Chunked = ca
                .iter()
                .map(|opt| opt.and_then(|v| v.is_finite().then(|| v as i64)))
                .collect();
            ms.with_name("timestamp".into()).into_series().cast(&target).map(|s| s.into_column())
        }
        DataType::String => {
            let ca = column.str()?;
            let ms: Int64Chunked = ca.iter().map(|opt| opt.and_then(parse_timestamp_ms)).collect();
            ms.with_name("timestamp".into()).into_series().cast(&target).map(|s| s.into_column())
        }
        _ => Ok(Series::full_null("timestamp".into(), column.len(), &target).into_column()),
    }
}

/// Parse a string timestamp to epoch milliseconds; naive values are UTC.
fn parse_timestamp_ms(value: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis());
    }
    None
}

/// Coerce a price/volume column to `Float64`; unparseable or non-finite
/// values become null, so NaN and infinity feed the same null-drop path as
/// a missing price.
fn coerce_numeric(column: &Column) -> PolarsResult<Column> {
    match column.dtype() {
        DataType::Float32 | DataType::Float64 => {
            let cast = column.cast(&DataType::Float64)?;
            let finite: Float64Chunked = cast
                .f64()?
                .iter()
                .map(|opt| opt.filter(|v| v.is_finite()))
                .collect();
            Ok(finite
                .with_name(column.name().clone())
                .into_series()
                .into_column())
        }
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64
        | DataType::Boolean => column.cast(&DataType::Float64),
        DataType::String => {
            let ca = column.str()?;
            let parsed: Float64Chunked = ca
                .iter()
                .map(|opt| opt.and_then(|v| v.trim().parse::<f64>().ok().filter(|v| v.is_finite())))
                .collect();
            Ok(parsed
                .with_name(column.name().clone())
                .into_series()
                .into_column())
        }
        _ => Ok(Series::full_null(column.name().clone(), column.len(), &DataType::Float64)
            .into_column()),
    }
}

/// Count OHLC-ordering and negative-volume violations in one pass each.
fn count_violations(df: &DataFrame) -> PolarsResult<(usize, usize)> {
    let open = df.column("open")?.f64()?;
    let high = df.column("high")?.f64()?;
    let low = df.column("low")?.f64()?;
    let close = df.column("close")?.f64()?;
    let volume = df.column("volume")?.f64()?;

    let mut ohlc_bad = 0usize;
    for i in 0..df.height() {
        let (Some(o), Some(h), Some(l), Some(c)) =
            (open.get(i), high.get(i), low.get(i), close.get(i))
        else {
            continue;
        };
        if l > o.min(c) || h < o.max(c) || l > h {
            ohlc_bad += 1;
        }
    }

    let neg_vol = volume.iter().flatten().filter(|v| *v < 0.0).count();

    Ok((ohlc_bad, neg_vol))
}

fn is_strictly_increasing(df: &DataFrame) -> PolarsResult<bool> {
    let ts = df.column("timestamp")?.cast(&DataType::Int64)?;
    let ts = ts.i64()?;
    let mut prev: Option<i64> = None;
    for value in ts.iter() {
        if let (Some(p), Some(v)) = (prev, value) {
            if v <= p {
                return Ok(false);
            }
        }
        prev = value;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_table(ts: &[i64], open: &[f64], high: &[f64], low: &[f64], close: &[f64], vol: &[f64]) -> DataFrame {
        df!(
            "timestamp" => ts,
            "open" => open,
            "high" => high,
            "low" => low,
            "close" => close,
            "volume" => vol,
        )
        .unwrap()
    }

    fn ts_ms(df: &DataFrame) -> Vec<i64> {
        df.column("timestamp")
            .unwrap()
            .cast(&DataType::Int64)
            .unwrap()
            .i64()
            .unwrap()
            .iter()
            .flatten()
            .collect()
    }

    #[test]
    fn normalizes_sorts_and_dedups_keep_last() {
        // duplicate timestamp at the first bar; second row must win
        let df = raw_table(
            &[1_700_000_000_000, 1_700_000_000_000, 1_700_000_900_000],
            &[10.0, 20.0, 30.0],
            &[21.0, 22.0, 31.0],
            &[9.0, 19.0, 29.0],
            &[20.0, 21.0, 30.5],
            &[100.0, 101.0, 102.0],
        );

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();

        assert_eq!(out.height(), 2);
        assert!(matches!(
            out.column("timestamp").unwrap().dtype(),
            DataType::Datetime(TimeUnit::Milliseconds, None)
        ));
        assert_eq!(ts_ms(&out), vec![1_700_000_000_000, 1_700_000_900_000]);
        let opens = out.column("open").unwrap().f64().unwrap();
        assert_eq!(opens.get(0), Some(20.0));
    }

    #[test]
    fn unsorted_input_comes_back_sorted() {
        let df = raw_table(
            &[1_700_000_900_000, 1_700_000_000_000],
            &[30.0, 10.0],
            &[31.0, 11.0],
            &[29.0, 9.0],
            &[30.5, 10.5],
            &[102.0, 100.0],
        );

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();
        assert_eq!(ts_ms(&out), vec![1_700_000_000_000, 1_700_000_900_000]);
    }

    #[test]
    fn missing_columns_raise_in_strict_mode() {
        let df = df!(
            "timestamp" => &[1_700_000_000_000i64],
            "open" => &[1.0],
        )
        .unwrap();

        let err = validate(&df, &OhlcvContract::default(), true).unwrap_err();
        match err {
            ContractError::MissingColumns(names) => {
                assert_eq!(names, vec!["high", "low", "close", "volume"]);
            }
            other => panic!("expected MissingColumns, got {other:?}"),
        }

        // non-strict: deliberate escape hatch, input passes through unchanged
        let out = validate(&df, &OhlcvContract::default(), false).unwrap();
        assert_eq!(out.width(), 2);
    }

    #[test]
    fn ohlc_sanity_violation_counts_rows() {
        // high < max(open, close)
        let df = raw_table(
            &[1_700_000_000_000],
            &[10.0],
            &[9.0],
            &[8.0],
            &[9.5],
            &[1.0],
        );

        let err = validate(&df, &OhlcvContract::default(), true).unwrap_err();
        assert!(matches!(err, ContractError::OhlcSanityViolation(1)));

        // non-strict leaves the violation in place
        let out = validate(&df, &OhlcvContract::default(), false).unwrap();
        assert_eq!(out.height(), 1);
    }

    #[test]
    fn negative_volume_raises_after_sanity() {
        let df = raw_table(
            &[1_700_000_000_000],
            &[10.0],
            &[11.0],
            &[9.0],
            &[10.5],
            &[-1.0],
        );

        let err = validate(&df, &OhlcvContract::default(), true).unwrap_err();
        assert!(matches!(err, ContractError::NegativeVolume(1)));
    }

    #[test]
    fn empty_input_strict_vs_non_strict() {
        let empty = DataFrame::empty();

        assert!(matches!(
            validate(&empty, &OhlcvContract::default(), true).unwrap_err(),
            ContractError::EmptyInput
        ));

        let out = validate(&empty, &OhlcvContract::default(), false).unwrap();
        assert_eq!(out.height(), 0);
        let names: Vec<&str> = out.get_column_names_str();
        assert_eq!(names, REQUIRED_COLUMNS.to_vec());
    }

    #[test]
    fn rows_with_null_prices_are_dropped_volume_nulls_retained() {
        let df = df!(
            "timestamp" => &[Some(1_700_000_000_000i64), Some(1_700_000_900_000), None],
            "open" => &[Some(10.0), None, Some(12.0)],
            "high" => &[Some(11.0), Some(12.0), Some(13.0)],
            "low" => &[Some(9.0), Some(10.0), Some(11.0)],
            "close" => &[Some(10.5), Some(11.5), Some(12.5)],
            "volume" => &[None, Some(5.0), Some(6.0)],
        )
        .unwrap();

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();

        // row 2 lost its open, row 3 its timestamp; row 1 keeps a null volume
        assert_eq!(out.height(), 1);
        assert_eq!(out.column("volume").unwrap().null_count(), 1);
    }

    #[test]
    fn non_finite_prices_are_dropped_like_nulls() {
        // NaN comparisons would make the sanity check silently pass, so a
        // NaN price must become null and fall out with the null-drop
        let df = raw_table(
            &[1_700_000_000_000, 1_700_000_900_000, 1_700_001_800_000],
            &[10.0, f64::NAN, 12.0],
            &[11.0, 12.0, f64::INFINITY],
            &[9.0, 10.0, 11.0],
            &[10.5, 11.5, 12.5],
            &[1.0, 2.0, 3.0],
        );

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();

        assert_eq!(out.height(), 1);
        assert_eq!(ts_ms(&out), vec![1_700_000_000_000]);

        // non-finite volume becomes null but the row itself survives
        let df = raw_table(
            &[1_700_000_000_000],
            &[10.0],
            &[11.0],
            &[9.0],
            &[10.5],
            &[f64::NAN],
        );
        let out = validate(&df, &OhlcvContract::default(), true).unwrap();
        assert_eq!(out.height(), 1);
        assert_eq!(out.column("volume").unwrap().null_count(), 1);
    }

    #[test]
    fn duplicate_timestamps_fail_strict_when_dedup_is_off() {
        let df = raw_table(
            &[1_700_000_000_000, 1_700_000_000_000],
            &[10.0, 20.0],
            &[11.0, 21.0],
            &[9.0, 19.0],
            &[10.5, 20.5],
            &[1.0, 2.0],
        );
        let contract = OhlcvContract {
            require_unique_ts: false,
            ..OhlcvContract::default()
        };

        let err = validate(&df, &contract, true).unwrap_err();
        assert!(matches!(err, ContractError::NotSorted));

        // non-strict keeps both rows, duplicates and all
        let out = validate(&df, &contract, false).unwrap();
        assert_eq!(out.height(), 2);
    }

    #[test]
    fn sanity_checks_can_be_disabled_per_contract() {
        // high < max(open, close): rejected by default, tolerated when the
        // contract opts out of sanity checks even in strict mode
        let df = raw_table(
            &[1_700_000_000_000],
            &[10.0],
            &[9.0],
            &[8.0],
            &[9.5],
            &[1.0],
        );
        let contract = OhlcvContract {
            strict_ohlc_sanity: false,
            ..OhlcvContract::default()
        };

        let out = validate(&df, &contract, true).unwrap();
        assert_eq!(out.height(), 1);
    }

    #[test]
    fn string_prices_and_timestamps_are_coerced() {
        let df = df!(
            "timestamp" => &["2024-01-01T00:00:00Z", "2024-01-01T00:15:00Z", "garbage"],
            "open" => &["10.0", "11.0", "12.0"],
            "high" => &["11.0", "12.0", "13.0"],
            "low" => &["9.0", "10.0", "11.0"],
            "close" => &["10.5", "11.5", "12.5"],
            "volume" => &["1", "2", "oops"],
        )
        .unwrap();

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(ts_ms(&out), vec![1_704_067_200_000, 1_704_068_100_000]);
        let opens = out.column("open").unwrap().f64().unwrap();
        assert_eq!(opens.get(0), Some(10.0));
    }

    #[test]
    fn three_rows_with_shared_timestamp_validate_to_two() {
        let df = raw_table(
            &[1_700_000_000_000, 1_700_000_000_000, 1_700_000_900_000],
            &[10.0, 20.0, 30.0],
            &[21.0, 22.0, 31.0],
            &[9.0, 19.0, 29.0],
            &[20.0, 21.0, 30.5],
            &[100.0, 101.0, 102.0],
        );

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();
        assert_eq!(out.height(), 2);
        assert_eq!(out.column("open").unwrap().f64().unwrap().get(0), Some(20.0));
    }

    #[test]
    fn validate_is_idempotent() {
        let df = raw_table(
            &[1_700_000_900_000, 1_700_000_000_000, 1_700_000_000_000],
            &[30.0, 10.0, 20.0],
            &[31.0, 21.0, 22.0],
            &[29.0, 9.0, 19.0],
            &[30.5, 20.0, 21.0],
            &[102.0, 100.0, 101.0],
        );

        let once = validate(&df, &OhlcvContract::default(), true).unwrap();
        let twice = validate(&once, &OhlcvContract::default(), true).unwrap();
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn extra_columns_pass_through() {
        let mut df = raw_table(
            &[1_700_000_000_000],
            &[10.0],
            &[11.0],
            &[9.0],
            &[10.5],
            &[1.0],
        );
        df.with_column(Series::new("trades".into(), &[42i64])).unwrap();

        let out = validate(&df, &OhlcvContract::default(), true).unwrap();
        assert!(out.column("trades").is_ok());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        prop_compose! {
            /// A sane bar: low/high bracket open/close by construction.
            fn sane_bar()(
                ts in 0i64..1_000,
                open in 1.0f64..100.0,
                close in 1.0f64..100.0,
                below in 0.0f64..5.0,
                above in 0.0f64..5.0,
                volume in 0.0f64..1_000.0,
            ) -> (i64, f64, f64, f64, f64, f64) {
                let low = open.min(close) - below;
                let high = open.max(close) + above;
                (ts * 60_000, open, high, low, close, volume)
            }
        }

        proptest! {
            #[test]
            fn output_is_strictly_increasing_and_idempotent(
                bars in prop::collection::vec(sane_bar(), 1..40)
            ) {
                let df = df!(
                    "timestamp" => bars.iter().map(|b| b.0).collect::<Vec<_>>(),
                    "open" => bars.iter().map(|b| b.1).collect::<Vec<_>>(),
                    "high" => bars.iter().map(|b| b.2).collect::<Vec<_>>(),
                    "low" => bars.iter().map(|b| b.3).collect::<Vec<_>>(),
                    "close" => bars.iter().map(|b| b.4).collect::<Vec<_>>(),
                    "volume" => bars.iter().map(|b| b.5).collect::<Vec<_>>(),
                ).unwrap();

                let once = validate(&df, &OhlcvContract::default(), true).unwrap();

                let ts: Vec<i64> = once
                    .column("timestamp").unwrap()
                    .cast(&DataType::Int64).unwrap()
                    .i64().unwrap()
                    .iter().flatten().collect();
                prop_assert!(ts.windows(2).all(|w| w[0] < w[1]));

                let twice = validate(&once, &OhlcvContract::default(), true).unwrap();
                prop_assert!(once.equals_missing(&twice));
            }
        }
    }
}
