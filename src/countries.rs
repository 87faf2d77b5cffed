// src/countries.rs
//
// Country Resolver: the country dimension is the inner join of the
// (continent, code) pairs seen in case data with the vaccination table.
// Codes present on only one side are dropped without error.

use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use std::{
    collections::{btree_map::Entry, BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::table::{self, UNKNOWN};
use crate::{cases, vaccinations};

pub fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("country_code", DataType::Utf8, false),
        Field::new("continent_name", DataType::Utf8, false),
        Field::new("country_name", DataType::Utf8, true),
    ]))
}

/// Distinct `(country_code, continent_name)` pairs from the cleaned case table,
/// without the unknown code.
fn case_pairs(cleaned: &RecordBatch) -> Result<BTreeSet<(String, String)>> {
    let continent = table::to_utf8(table::require_column(cleaned, cases::TABLE, cases::CONTINENT)?)?;
    let country = table::to_utf8(table::require_column(cleaned, cases::TABLE, cases::COUNTRY)?)?;
    Ok(table::as_strings(&country)
        .iter()
        .zip(table::as_strings(&continent).iter())
        .filter_map(|(code, cont)| match (code, cont) {
            (Some(code), Some(cont)) if code != UNKNOWN && cont != UNKNOWN => {
                Some((code.to_string(), cont.to_string()))
            }
            _ => None,
        })
        .collect())
}

/// First non-null `location` per `iso_code`, in input order.
fn vaccination_names(raw_vax: &RecordBatch) -> Result<HashMap<String, Option<String>>> {
    let iso = table::to_utf8(table::require_column(raw_vax, vaccinations::TABLE, vaccinations::ISO_CODE)?)?;
    let location = table::to_utf8(table::require_column(raw_vax, vaccinations::TABLE, vaccinations::LOCATION)?)?;

    let mut names: HashMap<String, Option<String>> = HashMap::new();
    for (code, name) in table::as_strings(&iso).iter().zip(table::as_strings(&location).iter()) {
        let Some(code) = code else { continue };
        let slot = names.entry(code.to_string()).or_insert(None);
        if slot.is_none() {
            *slot = name.map(str::to_string);
        }
    }
    Ok(names)
}

/// Build CountryDimension from the cleaned case table and the raw vaccination table.
///
/// One row per country code, ordered by code. A code seen with more than one
/// continent keeps the lexicographically first.
#[instrument(level = "info", skip_all, fields(case_rows = cleaned_cases.num_rows(), vax_rows = raw_vax.num_rows()))]
pub fn resolve_countries(cleaned_cases: &RecordBatch, raw_vax: &RecordBatch) -> Result<RecordBatch> {
    let pairs = case_pairs(cleaned_cases)?;
    let names = vaccination_names(raw_vax)?;

    let mut rows: BTreeMap<&str, (&str, Option<&str>)> = BTreeMap::new();
    let mut unmatched = 0usize;
    for (code, continent) in &pairs {
        let Some(name) = names.get(code) else {
            unmatched += 1;
            continue;
        };
        match rows.entry(code.as_str()) {
            Entry::Vacant(v) => {
                v.insert((continent.as_str(), name.as_deref()));
            }
            Entry::Occupied(o) => {
                warn!(code = %code, kept = o.get().0, ignored = %continent, "country listed under several continents");
            }
        }
    }
    debug!(
        unmatched_cases = unmatched,
        vaccination_codes = names.len(),
        "inner join dropped codes missing from one side"
    );

    let codes: StringArray = rows.keys().map(|c| Some(*c)).collect();
    let continents: StringArray = rows.values().map(|(c, _)| Some(*c)).collect();
    let country_names: StringArray = rows.values().map(|(_, n)| *n).collect();

    let out = RecordBatch::try_new(
        schema(),
        vec![Arc::new(codes) as ArrayRef, Arc::new(continents), Arc::new(country_names)],
    )?;
    info!(countries = out.num_rows(), "resolved countries");
    Ok(out)
}
