// src/indicators.rs

use arrow::{
    array::ArrayRef,
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::DuplicatePolicy;
use crate::error::Result;
use crate::table;

pub const TABLE: &str = "indicators";

/// Source column → IndicatorRecord column.
pub const COLUMNS: &[(&str, &str)] = &[
    ("LOCATION", "country_code"),
    ("INDICATOR", "indicator"),
    ("SUBJECT", "subject"),
    ("FREQUENCY", "frequency"),
    ("TIME", "time_period"),
    ("Value", "value"),
];

const KEY: &[&str] = &["country_code", "indicator", "subject", "frequency", "time_period"];

/// Rename to the canonical columns. `value` is Float64 (null when not
/// numeric); everything else, `time_period` included, is kept as text since
/// periods may be years or quarters.
#[instrument(level = "info", skip(raw), fields(rows = raw.num_rows()))]
pub fn normalize_indicators(raw: &RecordBatch, policy: DuplicatePolicy) -> Result<RecordBatch> {
    let selected = table::select_renamed(raw, TABLE, COLUMNS)?;
    let mut fields = Vec::with_capacity(COLUMNS.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(COLUMNS.len());
    for (field, arr) in selected.schema().fields().iter().zip(selected.columns()) {
        let to = if field.name() == "value" { DataType::Float64 } else { DataType::Utf8 };
        arrays.push(table::coerce(arr, &to, field.name())?);
        fields.push(Field::new(field.name(), to, true));
    }
    let projected = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    let out = table::apply_duplicate_policy(&projected, TABLE, policy, KEY)?;
    info!(rows = out.num_rows(), "normalized indicators");
    Ok(out)
}
