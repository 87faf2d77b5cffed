// src/vaccinations.rs

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

pub const TABLE: &str = "vaccinations";

pub const ISO_CODE: &str = "iso_code";
pub const LOCATION: &str = "location";

/// Source column → VaccinationRecord column.
pub const COLUMNS: &[(&str, &str)] = &[
    (ISO_CODE, "country_code"),
    ("date", "date_entry"),
    ("people_vaccinated", "people_vaccinated"),
    ("total_vaccinations", "total_vaccinations"),
    ("people_fully_vaccinated", "people_fully_vaccinated"),
    ("daily_vaccinations", "daily_vaccinations"),
    ("daily_vaccinations_per_million", "daily_vaccinations_per_million"),
];

fn column_type(column: &str) -> DataType {
    match column {
        "country_code" => DataType::Utf8,
        "date_entry" => DataType::Date32,
        _ => DataType::Float64,
    }
}

/// Select and rename the vaccination columns. `date_entry` becomes Date32 and
/// the counts Float64; values that do not convert are null and the row stays.
/// One output row per input row unless `policy` drops repeated
/// `(country_code, date_entry)` keys.
#[instrument(level = "info", skip(raw), fields(rows = raw.num_rows()))]
pub fn project_vaccinations(raw: &RecordBatch, policy: DuplicatePolicy) -> Result<RecordBatch> {
    let selected = table::select_renamed(raw, TABLE, COLUMNS)?;
    let mut fields = Vec::with_capacity(COLUMNS.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(COLUMNS.len());
    for (field, arr) in selected.schema().fields().iter().zip(selected.columns()) {
        let to = column_type(field.name());
        arrays.push(table::coerce(arr, &to, field.name())?);
        fields.push(Field::new(field.name(), to, true));
    }
    let projected = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?;
    let out = table::apply_duplicate_policy(&projected, TABLE, policy, &["country_code", "date_entry"])?;
    info!(rows = out.num_rows(), "projected vaccinations");
    Ok(out)
}
