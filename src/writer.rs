// src/writer.rs
//
// Partitioned Parquet writer. Layout:
//
//   <root>/<dataset>/<k1>=<v1>/<k2>=<v2>/part-00000.parquet
//   <root>/<dataset>/_SUCCESS
//
// Partition columns are stored in the directory names only. A write replaces
// the whole dataset directory; it is staged under `<root>/_temporary` and
// swapped in once every partition has been written.

use arrow::{array::UInt32Array, compute::take_record_batch, record_batch::RecordBatch};
use parquet::{arrow::ArrowWriter, basic::Compression, file::properties::WriterProperties};
use rayon::prelude::*;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument};

use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};
use crate::table::{self, UNKNOWN};

pub const SUCCESS_MARKER: &str = "_SUCCESS";
const STAGING_DIR: &str = "_temporary";
const PART_FILE: &str = "part-00000.parquet";

/// An output dataset: directory name under the output root plus its
/// partition keys, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetSpec {
    pub name: &'static str,
    pub partition_by: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteSummary {
    pub dataset: String,
    pub path: PathBuf,
    pub partitions: usize,
    pub rows: usize,
}

fn needs_escape(c: char) -> bool {
    c.is_control()
        || matches!(
            c,
            '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
        )
}

/// Percent-encode characters that cannot appear in a `key=value` path segment.
pub fn escape_partition_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if needs_escape(c) {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Inverse of [`escape_partition_value`]. Malformed escapes are kept verbatim.
pub fn unescape_partition_value(segment: &str) -> String {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            let hex = [bytes[i + 1], bytes[i + 2]];
            // both bytes are ASCII hex digits, so this cannot fail
            let b = std::str::from_utf8(&hex)
                .ok()
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .unwrap_or(b'%');
            out.push(b);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Relative directory for one partition key tuple.
fn partition_dir(partition_by: &[&str], values: &[String]) -> PathBuf {
    partition_by
        .iter()
        .zip(values)
        .map(|(k, v)| format!("{}={}", k, escape_partition_value(v)))
        .collect()
}

/// Row indices per partition key tuple. Rejects null, empty and `unknown`
/// partition values before anything touches disk.
fn group_rows(batch: &RecordBatch, spec: &DatasetSpec) -> Result<BTreeMap<Vec<String>, Vec<u32>>> {
    let rendered = table::render_rows(batch, spec.name, spec.partition_by)?;
    let mut groups: BTreeMap<Vec<String>, Vec<u32>> = BTreeMap::new();
    for (row, values) in rendered.into_iter().enumerate() {
        let mut key = Vec::with_capacity(values.len());
        for (column, value) in spec.partition_by.iter().zip(values) {
            match value {
                Some(v) if !v.is_empty() && v != UNKNOWN => key.push(v),
                other => {
                    return Err(PipelineError::InvalidPartitionValue {
                        dataset: spec.name.to_string(),
                        column: column.to_string(),
                        row,
                        value: other,
                    })
                }
            }
        }
        groups.entry(key).or_default().push(row as u32);
    }
    Ok(groups)
}

fn write_part(dir: &Path, data: &RecordBatch, rows: &[u32], props: &WriterProperties) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let part = take_record_batch(data, &UInt32Array::from(rows.to_vec()))?;

    let final_path = dir.join(PART_FILE);
    let tmp_path = final_path.with_extension("parquet.tmp");
    let file = File::create(&tmp_path).map_err(|e| PipelineError::io(&tmp_path, e))?;
    let mut writer = ArrowWriter::try_new(file, part.schema(), Some(props.clone()))?;
    writer.write(&part)?;
    writer.close()?;
    fs::rename(&tmp_path, &final_path).map_err(|e| PipelineError::io(&final_path, e))?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
    }
    Ok(())
}

/// Replace `target` with `staging`. The previous `target` is parked at `old`
/// until the new one is in place and restored if the rename fails.
fn swap_in(staging: &Path, target: &Path, old: &Path) -> Result<()> {
    remove_if_exists(old)?;
    let had_previous = target.exists();
    if had_previous {
        fs::rename(target, old).map_err(|e| PipelineError::io(target, e))?;
    }
    if let Err(e) = fs::rename(staging, target) {
        if had_previous {
            let _ = fs::rename(old, target);
        }
        return Err(PipelineError::io(target, e));
    }
    remove_if_exists(old)
}

/// Write `batch` as a partitioned dataset under the context's output root,
/// replacing any previous contents.
#[instrument(level = "info", skip(ctx, batch), fields(dataset = spec.name, rows = batch.num_rows()))]
pub fn write_partitioned(ctx: &ExecutionContext, batch: &RecordBatch, spec: &DatasetSpec) -> Result<WriteSummary> {
    let schema = batch.schema();
    for key in spec.partition_by {
        table::require_column(batch, spec.name, key)?;
    }
    let data_cols: Vec<usize> = schema
        .fields()
        .iter()
        .enumerate()
        .filter(|(_, f)| !spec.partition_by.contains(&f.name().as_str()))
        .map(|(i, _)| i)
        .collect();
    if data_cols.is_empty() {
        return Err(PipelineError::NoDataColumns {
            dataset: spec.name.to_string(),
        });
    }
    let data = batch.project(&data_cols)?;
    let groups = group_rows(batch, spec)?;

    let root = &ctx.config().output_root;
    let staging = root.join(STAGING_DIR).join(spec.name);
    let target = root.join(spec.name);
    remove_if_exists(&staging)?;
    fs::create_dir_all(&staging).map_err(|e| PipelineError::io(&staging, e))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let written = ctx.install(|| {
        groups
            .par_iter()
            .map(|(values, rows)| {
                let dir = staging.join(partition_dir(spec.partition_by, values));
                write_part(&dir, &data, rows, &props)?;
                debug!(partition = %dir.display(), rows = rows.len(), "wrote partition");
                Ok(())
            })
            .collect::<Result<Vec<()>>>()
    });
    if let Err(e) = written {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    let marker = staging.join(SUCCESS_MARKER);
    File::create(&marker).map_err(|e| PipelineError::io(&marker, e))?;

    swap_in(&staging, &target, &root.join(STAGING_DIR).join(format!("{}.old", spec.name)))?;
    // fails harmlessly while another dataset is still staged
    let _ = fs::remove_dir(root.join(STAGING_DIR));

    let summary = WriteSummary {
        dataset: spec.name.to_string(),
        path: target,
        partitions: groups.len(),
        rows: batch.num_rows(),
    };
    info!(partitions = summary.partitions, path = %summary.path.display(), "dataset written");
    Ok(summary)
}
