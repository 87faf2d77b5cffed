// src/config.rs

use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    path::{Path, PathBuf},
};

use crate::error::{PipelineError, Result};

static DEFAULT_CASES_INPUT: &str = "https://download.data.world/s/s65p7s2aqym4qams7ub2n4b72e5e4h";
static DEFAULT_VACCINATIONS_INPUT: &str =
    "https://raw.githubusercontent.com/owid/covid-19-data/master/public/data/vaccinations/vaccinations.csv";
static DEFAULT_INDICATORS_INPUT: &str = "Health spendings per country GDPR percentage.csv";

/// What to do with rows that repeat a time-series key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Pass every source row through.
    #[default]
    KeepAll,
    /// Keep the first row seen for each key, in input order.
    FirstPerKey,
}

/// Run parameters. Fixed for the lifetime of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Case/death CSV (URL or local path).
    pub cases_input: String,
    /// Vaccination time-series CSV (URL or local path).
    pub vaccinations_input: String,
    /// Health-spending indicator CSV (URL or local path).
    pub indicators_input: String,
    /// Root directory holding the four output datasets.
    pub output_root: PathBuf,
    /// Where remote inputs are downloaded to before parsing.
    pub download_dir: PathBuf,
    /// Rows per Arrow batch when reading CSV.
    pub batch_size: usize,
    /// Whole-request download timeout in seconds, body included. `None`
    /// waits as long as the server keeps sending.
    pub download_timeout_secs: Option<u64>,
    /// Writer threads; 0 lets rayon decide.
    pub threads: usize,
    pub duplicate_policy: DuplicatePolicy,
    /// Country name used by the post-run quality checks.
    pub check_country: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            cases_input: DEFAULT_CASES_INPUT.to_string(),
            vaccinations_input: DEFAULT_VACCINATIONS_INPUT.to_string(),
            indicators_input: DEFAULT_INDICATORS_INPUT.to_string(),
            output_root: PathBuf::from("data/outputs/vaccine_data"),
            download_dir: PathBuf::from("data/downloads"),
            batch_size: 8_192,
            download_timeout_secs: None,
            threads: 0,
            duplicate_policy: DuplicatePolicy::KeepAll,
            check_country: "Greece".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load a YAML config. Missing keys fall back to the defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| PipelineError::io(path, e))?;
        serde_yaml::from_reader(f).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }
}
