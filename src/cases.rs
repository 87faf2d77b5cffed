// src/cases.rs
//
// Case Aggregator: cleans the row-level case/death table and sums it into one
// row per country code.

use arrow::{
    array::{Array, ArrayRef, AsArray, Int64Array, StringArray},
    compute::filter_record_batch,
    datatypes::{DataType, Field, Int64Type, Schema, SchemaRef, TimeUnit},
    record_batch::RecordBatch,
};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::table::{self, UNKNOWN};

pub const TABLE: &str = "cases";

pub const REPORT_DATE: &str = "report_date";
pub const CONTINENT: &str = "continent_name";
pub const COUNTRY: &str = "country_alpha_3_code";
pub const NEW_CASES: &str = "people_positive_new_cases_count";
pub const NEW_DEATHS: &str = "people_death_new_count";

/// Output of the aggregator: the per-country summary plus the cleaned,
/// row-level table the country resolver reuses.
#[derive(Debug, Clone)]
pub struct CaseOutputs {
    pub summary: RecordBatch,
    pub cleaned: RecordBatch,
}

/// Schema of the cleaned row-level table.
pub fn cleaned_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(REPORT_DATE, DataType::Timestamp(TimeUnit::Microsecond, None), true),
        Field::new(CONTINENT, DataType::Utf8, false),
        Field::new(COUNTRY, DataType::Utf8, false),
        Field::new(NEW_CASES, DataType::Int64, true),
        Field::new(NEW_DEATHS, DataType::Int64, true),
    ]))
}

/// Schema of CaseSummary.
pub fn summary_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("country_code", DataType::Utf8, false),
        Field::new("total_cases", DataType::Int64, false),
        Field::new("total_deaths", DataType::Int64, false),
    ]))
}

/// Project, fill sentinels, drop unknown continents and parse report dates.
///
/// Rows with an unknown country code but a known continent are kept here.
#[instrument(level = "info", skip(raw), fields(rows = raw.num_rows()))]
pub fn clean_cases(raw: &RecordBatch) -> Result<RecordBatch> {
    let dates = table::to_utf8(table::require_column(raw, TABLE, REPORT_DATE)?)?;
    let continent = table::to_utf8(table::require_column(raw, TABLE, CONTINENT)?)?;
    let country = table::to_utf8(table::require_column(raw, TABLE, COUNTRY)?)?;
    let cases = table::to_int64(table::require_column(raw, TABLE, NEW_CASES)?, NEW_CASES)?;
    let deaths = table::to_int64(table::require_column(raw, TABLE, NEW_DEATHS)?, NEW_DEATHS)?;

    let continent = table::fill_nulls(table::as_strings(&continent), UNKNOWN);
    let country = table::fill_nulls(table::as_strings(&country), UNKNOWN);
    let keep = table::not_equal(&continent, UNKNOWN);
    let report_date = table::parse_report_dates(table::as_strings(&dates));

    let projected = RecordBatch::try_new(
        cleaned_schema(),
        vec![
            Arc::new(report_date) as ArrayRef,
            Arc::new(continent),
            Arc::new(country),
            cases,
            deaths,
        ],
    )?;
    let cleaned = filter_record_batch(&projected, &keep)?;
    debug!(
        dropped = projected.num_rows() - cleaned.num_rows(),
        "dropped rows with unknown continent"
    );
    Ok(cleaned)
}

/// Group the cleaned table by country code and sum cases and deaths.
///
/// Nulls count as zero. Rows still tagged with the unknown code are left out.
/// Output rows are ordered by country code.
#[instrument(level = "info", skip(cleaned), fields(rows = cleaned.num_rows()))]
pub fn aggregate_cases(cleaned: &RecordBatch) -> Result<RecordBatch> {
    let country = table::to_utf8(table::require_column(cleaned, TABLE, COUNTRY)?)?;
    let cases = table::to_int64(table::require_column(cleaned, TABLE, NEW_CASES)?, NEW_CASES)?;
    let deaths = table::to_int64(table::require_column(cleaned, TABLE, NEW_DEATHS)?, NEW_DEATHS)?;
    let country = table::as_strings(&country);
    let cases = cases.as_primitive::<Int64Type>();
    let deaths = deaths.as_primitive::<Int64Type>();

    let mut totals: BTreeMap<&str, (i64, i64)> = BTreeMap::new();
    let mut skipped = 0usize;
    for row in 0..cleaned.num_rows() {
        let code = match country.is_valid(row).then(|| country.value(row)) {
            Some(code) if code != UNKNOWN => code,
            _ => {
                skipped += 1;
                continue;
            }
        };
        let entry = totals.entry(code).or_insert((0, 0));
        if cases.is_valid(row) {
            entry.0 = entry.0.saturating_add(cases.value(row));
        }
        if deaths.is_valid(row) {
            entry.1 = entry.1.saturating_add(deaths.value(row));
        }
    }
    if skipped > 0 {
        debug!(skipped, "rows with unknown country code left out of aggregation");
    }

    let codes: StringArray = totals.keys().map(|c| Some(*c)).collect();
    let total_cases = Int64Array::from(totals.values().map(|(c, _)| *c).collect::<Vec<_>>());
    let total_deaths = Int64Array::from(totals.values().map(|(_, d)| *d).collect::<Vec<_>>());

    let summary = RecordBatch::try_new(
        summary_schema(),
        vec![Arc::new(codes) as ArrayRef, Arc::new(total_cases), Arc::new(total_deaths)],
    )?;
    info!(countries = summary.num_rows(), "aggregated cases");
    Ok(summary)
}

/// Clean then aggregate.
pub fn process_cases(raw: &RecordBatch) -> Result<CaseOutputs> {
    let cleaned = clean_cases(raw)?;
    let summary = aggregate_cases(&cleaned)?;
    Ok(CaseOutputs { summary, cleaned })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PipelineError;
    use arrow::array::Float64Array;
    use std::collections::HashSet;

    type Row<'a> = (Option<&'a str>, Option<&'a str>, Option<f64>, Option<f64>);

    /// Raw case table with the original source's column order and an extra
    /// column the aggregator must ignore.
    pub(crate) fn raw_cases(rows: &[Row<'_>]) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("people_positive_cases_count", DataType::Int64, true),
            Field::new(REPORT_DATE, DataType::Utf8, true),
            Field::new(CONTINENT, DataType::Utf8, true),
            Field::new(COUNTRY, DataType::Utf8, true),
            Field::new(NEW_CASES, DataType::Float64, true),
            Field::new(NEW_DEATHS, DataType::Float64, true),
        ]);
        let n = rows.len();
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(vec![0i64; n])) as ArrayRef,
                Arc::new(StringArray::from(vec!["2021-03-01"; n])),
                Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                Arc::new(StringArray::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.2).collect::<Vec<_>>())),
                Arc::new(Float64Array::from(rows.iter().map(|r| r.3).collect::<Vec<_>>())),
            ],
        )
        .unwrap()
    }

    fn summary_rows(b: &RecordBatch) -> HashSet<(String, i64, i64)> {
        let codes = b.column(0).as_string::<i32>();
        let cases = b.column(1).as_primitive::<Int64Type>();
        let deaths = b.column(2).as_primitive::<Int64Type>();
        (0..b.num_rows())
            .map(|i| (codes.value(i).to_string(), cases.value(i), deaths.value(i)))
            .collect()
    }

    #[test]
    fn greece_is_summed_and_unknown_continent_dropped() {
        let raw = raw_cases(&[
            (Some("GRC"), Some("Europe"), Some(10.0), Some(1.0)),
            (Some("GRC"), Some("Europe"), Some(5.0), Some(0.0)),
            (Some("XXX"), Some("unknown"), Some(99.0), Some(9.0)),
        ]);
        let out = process_cases(&raw).unwrap();
        assert_eq!(
            summary_rows(&out.summary),
            HashSet::from([("GRC".to_string(), 15, 1)])
        );
        assert_eq!(out.cleaned.num_rows(), 2);
    }

    #[test]
    fn missing_values_become_unknown_and_zero() {
        let raw = raw_cases(&[
            (Some("ITA"), None, Some(7.0), Some(1.0)),
            (None, Some("Europe"), Some(3.0), Some(3.0)),
            (Some("FRA"), Some("Europe"), None, Some(2.0)),
            (Some("FRA"), Some("Europe"), Some(4.0), None),
        ]);
        let out = process_cases(&raw).unwrap();

        // null continent filled then dropped; null code kept in the cleaned table
        let cleaned_codes = out.cleaned.column_by_name(COUNTRY).unwrap().as_string::<i32>();
        let codes: Vec<_> = cleaned_codes.iter().flatten().collect();
        assert_eq!(codes, vec![UNKNOWN, "FRA", "FRA"]);

        assert_eq!(
            summary_rows(&out.summary),
            HashSet::from([("FRA".to_string(), 4, 2)])
        );
    }

    #[test]
    fn aggregation_is_idempotent() {
        let raw = raw_cases(&[
            (Some("GRC"), Some("Europe"), Some(1.0), Some(0.0)),
            (Some("USA"), Some("America"), Some(20.0), Some(2.0)),
            (Some("GRC"), Some("Europe"), Some(2.0), Some(1.0)),
        ]);
        let cleaned = clean_cases(&raw).unwrap();
        let a = aggregate_cases(&cleaned).unwrap();
        let b = aggregate_cases(&cleaned).unwrap();
        assert_eq!(a, b);
        assert_eq!(summary_rows(&a), summary_rows(&process_cases(&raw).unwrap().summary));
    }

    #[test]
    fn bad_dates_are_null_not_errors() {
        let mut raw = raw_cases(&[(Some("GRC"), Some("Europe"), Some(1.0), Some(0.0))]);
        let cols: Vec<ArrayRef> = raw
            .columns()
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i == 1 {
                    Arc::new(StringArray::from(vec!["03/01/2021"])) as ArrayRef
                } else {
                    c.clone()
                }
            })
            .collect();
        raw = RecordBatch::try_new(raw.schema(), cols).unwrap();

        let cleaned = clean_cases(&raw).unwrap();
        assert_eq!(cleaned.num_rows(), 1);
        assert!(cleaned.column_by_name(REPORT_DATE).unwrap().is_null(0));
    }

    #[test]
    fn missing_column_is_schema_error() {
        let raw = raw_cases(&[(Some("GRC"), Some("Europe"), Some(1.0), Some(0.0))]);
        let trimmed = raw.project(&[0, 1, 2, 3, 4]).unwrap();
        match clean_cases(&trimmed).unwrap_err() {
            PipelineError::MissingColumn { column, .. } => assert_eq!(column, NEW_DEATHS),
            other => panic!("unexpected error: {other}"),
        }
    }
}
