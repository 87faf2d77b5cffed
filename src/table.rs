// src/table.rs
//
// Column-level helpers shared by the transforms. Everything here works on
// whole Arrow arrays; no helper mutates its input.

use arrow::{
    array::{Array, ArrayRef, AsArray, BooleanArray, StringArray, TimestampMicrosecondArray, UInt32Array},
    compute,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
    util::display::{ArrayFormatter, FormatOptions},
};
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

use crate::config::DuplicatePolicy;
use crate::error::{PipelineError, Result};

/// Sentinel for an unresolved country code or continent.
pub const UNKNOWN: &str = "unknown";

static REPORT_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap());

/// Look up a column by name or fail with a schema error naming the table.
pub fn require_column<'a>(batch: &'a RecordBatch, table: &str, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| PipelineError::missing_column(table, name))
}

/// Project `batch` to `columns` (source name, output name), in that order.
/// All output fields are nullable.
pub fn select_renamed(batch: &RecordBatch, table: &str, columns: &[(&str, &str)]) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(columns.len());
    let mut arrays = Vec::with_capacity(columns.len());
    for (src, dst) in columns {
        let arr = require_column(batch, table, src)?;
        fields.push(Field::new(*dst, arr.data_type().clone(), true));
        arrays.push(arr.clone());
    }
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).map_err(Into::into)
}

/// Coerce to Utf8. Anything that is not already a string goes through a safe cast.
pub fn to_utf8(arr: &ArrayRef) -> Result<ArrayRef> {
    if arr.data_type() == &DataType::Utf8 {
        return Ok(arr.clone());
    }
    Ok(compute::cast(arr, &DataType::Utf8)?)
}

/// Safe cast to `to`: values that do not convert become null.
pub fn coerce(arr: &ArrayRef, to: &DataType, column: &str) -> Result<ArrayRef> {
    if arr.data_type() == to {
        return Ok(arr.clone());
    }
    let out = compute::cast(arr, to)?;
    let lost = out.null_count().saturating_sub(arr.null_count());
    if lost > 0 {
        debug!(column, lost, to = %to, "values not convertible; set to null");
    }
    Ok(out)
}

/// Coerce to Int64 with null on failure.
pub fn to_int64(arr: &ArrayRef, column: &str) -> Result<ArrayRef> {
    coerce(arr, &DataType::Int64, column)
}

/// Coerce to Float64 with null on failure.
pub fn to_float64(arr: &ArrayRef, column: &str) -> Result<ArrayRef> {
    coerce(arr, &DataType::Float64, column)
}

/// Replace nulls with `fill`.
pub fn fill_nulls(arr: &StringArray, fill: &str) -> StringArray {
    arr.iter().map(|v| Some(v.unwrap_or(fill))).collect()
}

/// Mask of rows whose value differs from `value`. Nulls count as different.
pub fn not_equal(arr: &StringArray, value: &str) -> BooleanArray {
    arr.iter().map(|v| Some(v != Some(value))).collect()
}

/// Parse a strict `YYYY-MM-DD` string to midnight UTC, in microseconds.
pub fn parse_report_date(s: &str) -> Option<i64> {
    if !REPORT_DATE.is_match(s) {
        return None;
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_micros())
}

/// Parse a string column with [`parse_report_date`]; failures become null.
pub fn parse_report_dates(arr: &StringArray) -> TimestampMicrosecondArray {
    let out: TimestampMicrosecondArray = arr.iter().map(|v| v.and_then(parse_report_date)).collect();
    let lost = out.null_count().saturating_sub(arr.null_count());
    if lost > 0 {
        debug!(lost, "report dates not matching YYYY-MM-DD; set to null");
    }
    out
}

/// Render one display string per row and column, `None` for nulls.
pub fn render_rows(batch: &RecordBatch, table: &str, columns: &[&str]) -> Result<Vec<Vec<Option<String>>>> {
    let opts = FormatOptions::default();
    let arrays = columns
        .iter()
        .map(|c| require_column(batch, table, c).cloned())
        .collect::<Result<Vec<ArrayRef>>>()?;
    let formatters = arrays
        .iter()
        .map(|a| ArrayFormatter::try_new(a.as_ref(), &opts))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((0..batch.num_rows())
        .map(|row| {
            arrays
                .iter()
                .zip(&formatters)
                .map(|(a, f)| (!a.is_null(row)).then(|| f.value(row).to_string()))
                .collect()
        })
        .collect())
}

/// Apply the configured duplicate policy over `key_columns`.
pub fn apply_duplicate_policy(
    batch: &RecordBatch,
    table: &str,
    policy: DuplicatePolicy,
    key_columns: &[&str],
) -> Result<RecordBatch> {
    match policy {
        DuplicatePolicy::KeepAll => Ok(batch.clone()),
        DuplicatePolicy::FirstPerKey => {
            let keys = render_rows(batch, table, key_columns)?;
            let mut seen = HashSet::with_capacity(keys.len());
            let keep = UInt32Array::from(
                keys.into_iter()
                    .enumerate()
                    .filter_map(|(i, k)| seen.insert(k).then_some(i as u32))
                    .collect::<Vec<u32>>(),
            );
            let dropped = batch.num_rows() - keep.len();
            if dropped > 0 {
                debug!(table, dropped, "dropped duplicate rows");
            }
            Ok(compute::take_record_batch(batch, &keep)?)
        }
    }
}

/// Borrow a Utf8 column as a `StringArray`.
pub fn as_strings(arr: &ArrayRef) -> &StringArray {
    arr.as_string::<i32>()
}
