// src/checks.rs
//
// Post-run quality checks: per-country vaccination and case totals read back
// from the written datasets.

use arrow::{
    array::{Array, AsArray},
    compute,
    datatypes::{DataType, Float64Type, Int64Type},
    record_batch::RecordBatch,
};
use std::path::Path;
use tracing::{info, instrument, warn};

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::pipeline::{CASES, COUNTRIES, VACCINATIONS};
use crate::reader::scan_dataset;
use crate::table;

#[derive(Debug, Clone, PartialEq)]
pub struct VaccinationTotals {
    pub country_name: String,
    pub people_vaccinated: f64,
    pub people_fully_vaccinated: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseTotals {
    pub country_name: String,
    pub total_cases: i64,
    pub total_deaths: i64,
}

/// Country code for `country_name`, looked up in the countries dataset.
pub fn country_code_for(root: &Path, country_name: &str) -> Result<Option<String>> {
    for batch in scan_dataset(root, COUNTRIES.name, &[])? {
        let names = table::to_utf8(table::require_column(&batch, COUNTRIES.name, "country_name")?)?;
        let codes = table::to_utf8(table::require_column(&batch, COUNTRIES.name, "country_code")?)?;
        let codes = table::as_strings(&codes);
        let hit = table::as_strings(&names)
            .iter()
            .position(|n| n == Some(country_name));
        if let Some(i) = hit {
            return Ok(Some(codes.value(i).to_string()));
        }
    }
    Ok(None)
}

fn sum_f64(batches: &[RecordBatch], dataset: &str, column: &str) -> Result<f64> {
    let mut total = 0.0;
    for b in batches {
        let col = compute::cast(table::require_column(b, dataset, column)?, &DataType::Float64)?;
        total += compute::sum(col.as_primitive::<Float64Type>()).unwrap_or(0.0);
    }
    Ok(total)
}

fn sum_i64(batches: &[RecordBatch], dataset: &str, column: &str) -> Result<i64> {
    let mut total = 0i64;
    for b in batches {
        let col = table::to_int64(table::require_column(b, dataset, column)?, column)?;
        let ints = col.as_primitive::<Int64Type>();
        total = total.saturating_add(ints.iter().flatten().sum::<i64>());
        if ints.null_count() > 0 {
            warn!(dataset, column, nulls = ints.null_count(), "null values counted as zero");
        }
    }
    Ok(total)
}

/// Sum of `people_vaccinated` and `people_fully_vaccinated` across every
/// reported day for the country.
#[instrument(level = "info", skip(root))]
pub fn vaccination_totals(root: &Path, country_name: &str) -> Result<Option<VaccinationTotals>> {
    let Some(code) = country_code_for(root, country_name)? else {
        return Ok(None);
    };
    let batches = scan_dataset(root, VACCINATIONS.name, &[("country_code", code.as_str())])?;
    Ok(Some(VaccinationTotals {
        country_name: country_name.to_string(),
        people_vaccinated: sum_f64(&batches, VACCINATIONS.name, "people_vaccinated")?,
        people_fully_vaccinated: sum_f64(&batches, VACCINATIONS.name, "people_fully_vaccinated")?,
    }))
}

/// Total cases and deaths for the country.
#[instrument(level = "info", skip(root))]
pub fn case_totals(root: &Path, country_name: &str) -> Result<Option<CaseTotals>> {
    let Some(code) = country_code_for(root, country_name)? else {
        return Ok(None);
    };
    let batches = scan_dataset(root, CASES.name, &[("country_code", code.as_str())])?;
    if batches.iter().all(|b| b.num_rows() == 0) {
        return Ok(None);
    }
    Ok(Some(CaseTotals {
        country_name: country_name.to_string(),
        total_cases: sum_i64(&batches, CASES.name, "total_cases")?,
        total_deaths: sum_i64(&batches, CASES.name, "total_deaths")?,
    }))
}

/// Run both checks for the configured country and log the results.
pub fn run_quality_checks(ctx: &ExecutionContext) -> Result<()> {
    let root = &ctx.config().output_root;
    let country = ctx.config().check_country.as_str();

    match vaccination_totals(root, country)? {
        Some(v) => info!(
            country,
            people_vaccinated = v.people_vaccinated,
            people_fully_vaccinated = v.people_fully_vaccinated,
            "vaccination check"
        ),
        None => warn!(country, "vaccination check: country not in countries dataset"),
    }
    match case_totals(root, country)? {
        Some(c) => info!(
            country,
            total_cases = c.total_cases,
            total_deaths = c.total_deaths,
            "case check"
        ),
        None => warn!(country, "case check: no case summary for country"),
    }
    Ok(())
}
