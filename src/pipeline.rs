// src/pipeline.rs

use std::time::Instant;
use tracing::{info, instrument};

use crate::cases::process_cases;
use crate::context::ExecutionContext;
use crate::countries::resolve_countries;
use crate::error::Result;
use crate::indicators::normalize_indicators;
use crate::source::load_table;
use crate::vaccinations::project_vaccinations;
use crate::writer::{write_partitioned, DatasetSpec, WriteSummary};

pub const CASES: DatasetSpec = DatasetSpec {
    name: "covid_cases",
    partition_by: &["country_code", "total_cases"],
};

pub const VACCINATIONS: DatasetSpec = DatasetSpec {
    name: "Vaccinations",
    partition_by: &["country_code"],
};

pub const COUNTRIES: DatasetSpec = DatasetSpec {
    name: "countries",
    partition_by: &["country_code", "continent_name"],
};

pub const INDICATORS: DatasetSpec = DatasetSpec {
    name: "GDPR",
    partition_by: &["country_code", "time_period"],
};

/// Datasets written by one run, in write order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub datasets: Vec<WriteSummary>,
}

impl RunSummary {
    pub fn get(&self, dataset: &str) -> Option<&WriteSummary> {
        self.datasets.iter().find(|d| d.dataset == dataset)
    }
}

/// Run the whole pipeline once.
///
/// Each dataset is written as soon as it is produced. The first fatal error
/// stops the run; datasets already written stay on disk.
#[instrument(level = "info", skip(ctx))]
pub fn run(ctx: &ExecutionContext) -> Result<RunSummary> {
    let start = Instant::now();
    let cfg = ctx.config();
    let mut summary = RunSummary::default();

    // ─── cases ───────────────────────────────────────────────────────
    let raw_cases = load_table(ctx, "cases", &cfg.cases_input)?;
    let cases = process_cases(&raw_cases)?;
    drop(raw_cases);
    summary.datasets.push(write_partitioned(ctx, &cases.summary, &CASES)?);

    // ─── indicators ──────────────────────────────────────────────────
    let raw_indicators = load_table(ctx, "indicators", &cfg.indicators_input)?;
    let indicators = normalize_indicators(&raw_indicators, cfg.duplicate_policy)?;
    summary.datasets.push(write_partitioned(ctx, &indicators, &INDICATORS)?);

    // ─── vaccinations + countries ────────────────────────────────────
    let raw_vax = load_table(ctx, "vaccinations", &cfg.vaccinations_input)?;
    let vaccinations = project_vaccinations(&raw_vax, cfg.duplicate_policy)?;
    summary.datasets.push(write_partitioned(ctx, &vaccinations, &VACCINATIONS)?);

    let countries = resolve_countries(&cases.cleaned, &raw_vax)?;
    drop(cases);
    summary.datasets.push(write_partitioned(ctx, &countries, &COUNTRIES)?);

    info!(elapsed = ?start.elapsed(), datasets = summary.datasets.len(), "pipeline finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::{case_totals, country_code_for, vaccination_totals};
    use crate::config::{DuplicatePolicy, PipelineConfig};
    use crate::error::PipelineError;
    use crate::reader::scan_dataset;
    use crate::table::UNKNOWN;
    use arrow::array::AsArray;
    use glob::glob;
    use std::{fs, path::Path};
    use tempfile::{tempdir, TempDir};
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    const CASES_CSV: &str = "\
report_date,continent_name,country_alpha_3_code,people_positive_new_cases_count,people_death_new_count,data_source
2021-03-01,Europe,GRC,10,1,ecdc
2021-03-02,Europe,GRC,5,0,ecdc
2021-03-02,,XXX,99,9,ecdc
2021-03-01,Europe,ITA,7,2,ecdc
not-a-date,Europe,ITA,,1,ecdc
2021-03-01,Asia,,4,4,ecdc
2021-03-01,America,USA,30,3,ecdc
";

    const VAX_CSV: &str = "\
location,iso_code,date,total_vaccinations,people_vaccinated,people_fully_vaccinated,total_boosters,daily_vaccinations_raw,daily_vaccinations,total_vaccinations_per_hundred,daily_vaccinations_per_million
Greece,GRC,2021-01-01,1500,1000,500,,,,0.01,10
Greece,GRC,2021-01-02,2300,1200,800,,800,800,0.02,80
Italy,ITA,2021-01-01,3000,2500,500,,,,0.05,30
Nowhere,ZZZ,2021-01-01,1,1,0,,,,0.0,0
";

    const GDPR_CSV: &str = "\
LOCATION,INDICATOR,SUBJECT,MEASURE,FREQUENCY,TIME,Value,Flag Codes
GRC,HEALTHEXP,TOT,PC_GDP,A,2018,7.7,
GRC,HEALTHEXP,TOT,PC_GDP,A,2019,7.8,
ITA,HEALTHEXP,TOT,PC_GDP,A,2019,8.7,P
";

    fn init_test_logging() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new("info,covid_lake=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn setup(cases_csv: &str) -> (TempDir, ExecutionContext) {
        init_test_logging();
        let dir = tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let p = dir.path().join(name);
            fs::write(&p, body).unwrap();
            p.to_string_lossy().into_owned()
        };
        let cfg = PipelineConfig {
            cases_input: write("cases.csv", cases_csv),
            vaccinations_input: write("vaccinations.csv", VAX_CSV),
            indicators_input: write("gdpr.csv", GDPR_CSV),
            output_root: dir.path().join("out"),
            download_dir: dir.path().join("downloads"),
            threads: 2,
            ..PipelineConfig::default()
        };
        let ctx = ExecutionContext::new(cfg).unwrap();
        (dir, ctx)
    }

    fn all_paths(root: &Path) -> Vec<String> {
        glob(&format!("{}/**/*", root.display()))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|p| p.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn end_to_end_writes_four_datasets() {
        let (_dir, ctx) = setup(CASES_CSV);
        let root = ctx.config().output_root.clone();

        let summary = run(&ctx).unwrap();
        assert_eq!(summary.datasets.len(), 4);
        for spec in [CASES, VACCINATIONS, COUNTRIES, INDICATORS] {
            assert!(root.join(spec.name).join("_SUCCESS").exists(), "{}", spec.name);
        }
        assert_eq!(summary.get("covid_cases").unwrap().rows, 3);
        assert_eq!(summary.get("Vaccinations").unwrap().rows, 4);
        assert_eq!(summary.get("GDPR").unwrap().partitions, 3);

        // nothing partitioned under the sentinel
        let paths = all_paths(&root);
        assert!(!paths.is_empty());
        assert!(paths.iter().all(|p| !p.contains(UNKNOWN)));
        assert!(root.join("covid_cases/country_code=GRC/total_cases=15").is_dir());

        // ZZZ has no cases and USA has no vaccinations
        let countries = scan_dataset(&root, COUNTRIES.name, &[]).unwrap();
        let mut codes: Vec<String> = countries
            .iter()
            .flat_map(|b| {
                b.column_by_name("country_code")
                    .unwrap()
                    .as_string::<i32>()
                    .iter()
                    .flatten()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        codes.sort();
        assert_eq!(codes, vec!["GRC", "ITA"]);
        assert_eq!(country_code_for(&root, "Greece").unwrap().as_deref(), Some("GRC"));
        assert_eq!(country_code_for(&root, "Nowhere").unwrap(), None);

        let cases = case_totals(&root, "Greece").unwrap().unwrap();
        assert_eq!((cases.total_cases, cases.total_deaths), (15, 1));
        let italy = case_totals(&root, "Italy").unwrap().unwrap();
        assert_eq!((italy.total_cases, italy.total_deaths), (7, 3));

        let vax = vaccination_totals(&root, "Greece").unwrap().unwrap();
        assert_eq!(vax.people_vaccinated, 2200.0);
        assert_eq!(vax.people_fully_vaccinated, 1300.0);
        assert_eq!(vaccination_totals(&root, "Nowhere").unwrap(), None);

        crate::checks::run_quality_checks(&ctx).unwrap();
    }

    #[test]
    fn rerun_yields_identical_output() {
        let (_dir, ctx) = setup(CASES_CSV);
        let root = ctx.config().output_root.clone();

        run(&ctx).unwrap();
        let mut first = all_paths(&root);
        first.sort();
        let greece = case_totals(&root, "Greece").unwrap();

        run(&ctx).unwrap();
        let mut second = all_paths(&root);
        second.sort();
        assert_eq!(first, second);
        assert_eq!(case_totals(&root, "Greece").unwrap(), greece);
    }

    #[test]
    fn missing_case_column_aborts_before_any_write() {
        let broken = CASES_CSV.replace("people_death_new_count", "deaths");
        let (_dir, ctx) = setup(&broken);

        let err = run(&ctx).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "people_death_new_count"));
        assert!(!ctx.config().output_root.join(CASES.name).exists());
    }

    #[test]
    fn duplicate_policy_applies_to_time_series() {
        let (dir, ctx) = setup(CASES_CSV);
        let dup_vax = format!("{}Greece,GRC,2021-01-02,9999,9999,9999,,,,0.0,0\n", VAX_CSV);
        let vax_path = dir.path().join("vaccinations_dup.csv");
        fs::write(&vax_path, dup_vax).unwrap();

        let mut cfg = ctx.config().clone();
        cfg.vaccinations_input = vax_path.to_string_lossy().into_owned();
        cfg.duplicate_policy = DuplicatePolicy::FirstPerKey;
        let ctx = ExecutionContext::new(cfg).unwrap();

        let summary = run(&ctx).unwrap();
        assert_eq!(summary.get("Vaccinations").unwrap().rows, 4);
        let vax = vaccination_totals(&ctx.config().output_root, "Greece").unwrap().unwrap();
        assert_eq!(vax.people_vaccinated, 2200.0);
    }
}
