// src/error.rs

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Fatal pipeline failures. Anything that reaches the caller aborts the run.
///
/// Parse failures on individual fields never show up here; they degrade the
/// field to null and are only logged.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required input column is absent.
    #[error("table `{table}` is missing required column `{column}`")]
    MissingColumn { table: String, column: String },

    /// A partition key column holds a null or the `unknown` sentinel.
    #[error("dataset `{dataset}`: partition column `{column}` has invalid value {value:?} at row {row}")]
    InvalidPartitionValue {
        dataset: String,
        column: String,
        row: usize,
        value: Option<String>,
    },

    /// Every column is a partition key, leaving nothing to store in the files.
    #[error("dataset `{dataset}` has no columns left after removing partition keys")]
    NoDataColumns { dataset: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parquet: {0}")]
    Parquet(#[from] ParquetError),

    #[error("arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("reading config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("building worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub fn missing_column(table: &str, column: &str) -> Self {
        PipelineError::MissingColumn {
            table: table.to_string(),
            column: column.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }
}
