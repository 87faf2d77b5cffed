pub mod cases;
pub mod checks;
pub mod config;
pub mod context;
pub mod countries;
pub mod error;
pub mod indicators;
pub mod pipeline;
pub mod reader;
pub mod source;
pub mod table;
pub mod vaccinations;
pub mod writer;

pub use config::{DuplicatePolicy, PipelineConfig};
pub use context::ExecutionContext;
pub use error::{PipelineError, Result};
pub use pipeline::{run, RunSummary};
