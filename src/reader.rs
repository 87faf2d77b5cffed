// src/reader.rs

use arrow::{
    array::{ArrayRef, StringArray},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use glob::{glob, Pattern};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::{
    fs::File,
    io,
    path::{Component, Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, instrument};

use crate::error::{PipelineError, Result};
use crate::writer::unescape_partition_value;

/// `key=value` directory segments between the dataset root and a file.
fn partition_values(dataset_dir: &Path, file: &Path) -> Vec<(String, String)> {
    let Some(dir) = file.strip_prefix(dataset_dir).ok().and_then(Path::parent) else {
        return Vec::new();
    };
    dir.components()
        .filter_map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .filter_map(|s| s.split_once('='))
        .map(|(k, v)| (k.to_string(), unescape_partition_value(v)))
        .collect()
}

fn with_partition_columns(batch: RecordBatch, parts: &[(String, String)]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let mut fields: Vec<Field> = schema.fields().iter().map(|f| f.as_ref().clone()).collect();
    let mut columns: Vec<ArrayRef> = batch.columns().to_vec();
    for (k, v) in parts {
        fields.push(Field::new(k, DataType::Utf8, false));
        columns.push(Arc::new(StringArray::from(vec![v.as_str(); batch.num_rows()])));
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Read a dataset written by [`crate::writer::write_partitioned`].
///
/// `filters` are equality predicates on partition columns; partitions that
/// fail any of them are never opened. Partition columns come back as Utf8,
/// after the file columns.
#[instrument(level = "debug", skip(root))]
pub fn scan_dataset(root: &Path, dataset: &str, filters: &[(&str, &str)]) -> Result<Vec<RecordBatch>> {
    let dataset_dir = root.join(dataset);
    if !dataset_dir.is_dir() {
        return Err(PipelineError::io(
            &dataset_dir,
            io::Error::new(io::ErrorKind::NotFound, "dataset directory not found"),
        ));
    }

    let pattern = format!("{}/**/*.parquet", Pattern::escape(&dataset_dir.to_string_lossy()));
    let mut files = glob(&pattern)?
        .map(|entry| {
            entry.map_err(|e| {
                let path = e.path().to_path_buf();
                PipelineError::io(path, e.into())
            })
        })
        .collect::<Result<Vec<PathBuf>>>()?;
    files.sort();

    let mut out = Vec::new();
    let mut pruned = 0usize;
    'files: for path in files {
        let parts = partition_values(&dataset_dir, &path);
        for (key, want) in filters {
            match parts.iter().find(|(k, _)| k == key) {
                Some((_, v)) if v == want => {}
                Some(_) => {
                    pruned += 1;
                    continue 'files;
                }
                None => return Err(PipelineError::missing_column(dataset, key)),
            }
        }

        let file = File::open(&path).map_err(|e| PipelineError::io(&path, e))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        for batch in reader {
            out.push(with_partition_columns(batch?, &parts)?);
        }
    }
    debug!(batches = out.len(), pruned, "scan complete");
    Ok(out)
}
