// src/source.rs

use arrow::{
    compute::concat_batches,
    csv::{reader::Format, ReaderBuilder},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use reqwest::blocking::Client;
use std::{
    fs::{self, File},
    io::{self, Seek},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, info, instrument};
use url::Url;

use crate::context::ExecutionContext;
use crate::error::{PipelineError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where an input table comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Remote(Url),
    Local(PathBuf),
}

impl Source {
    /// `http(s)://` strings are remote, everything else is a filesystem path.
    pub fn parse(s: &str) -> Self {
        match Url::parse(s) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Source::Remote(url),
            _ => Source::Local(PathBuf::from(s)),
        }
    }
}

/// File name used when caching a remote source locally.
fn download_name(url: &Url, fallback: &str) -> String {
    url.path_segments()
        .and_then(|mut segs| segs.next_back())
        .filter(|s| !s.is_empty())
        .map(|s| {
            if s.to_lowercase().ends_with(".csv") {
                s.to_string()
            } else {
                format!("{}.csv", s)
            }
        })
        .unwrap_or_else(|| format!("{}.csv", fallback))
}

/// Blocking client for input downloads. `timeout` covers the whole request,
/// body included; `None` leaves only the connect timeout.
pub fn http_client(timeout: Option<Duration>) -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(timeout)
        .build()
}

/// Download `url` into `dir`, replacing any earlier copy.
#[instrument(level = "info", skip(client, url, dir), fields(url = %url))]
pub fn download(client: &Client, url: &Url, dir: &Path, fallback: &str) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let dest = dir.join(download_name(url, fallback));

    let fetch_err = |source: reqwest::Error| PipelineError::Fetch {
        url: url.to_string(),
        source,
    };
    let mut resp = client
        .get(url.clone())
        .send()
        .and_then(|r| r.error_for_status())
        .map_err(fetch_err)?;

    let tmp = dest.with_extension("csv.tmp");
    let mut out = File::create(&tmp).map_err(|e| PipelineError::io(&tmp, e))?;
    let copied = io::copy(&mut resp, &mut out);
    let bytes = match copied {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(PipelineError::io(&tmp, e));
        }
    };
    fs::rename(&tmp, &dest).map_err(|e| PipelineError::io(&dest, e))?;

    info!(bytes, path = %dest.display(), "downloaded");
    Ok(dest)
}

/// Read a headed CSV file into a single batch with every column as nullable
/// Utf8. Empty fields are null. Typing is left to the transforms, which coerce
/// with null on failure, so no value anywhere in the file can fail the read.
pub fn read_csv(path: &Path, batch_size: usize) -> Result<RecordBatch> {
    let mut file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let format = Format::default().with_header(true);
    // header only
    let (header, _) = format.infer_schema(&mut file, Some(0))?;
    file.rewind().map_err(|e| PipelineError::io(path, e))?;

    let fields: Vec<Field> = header
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), DataType::Utf8, true))
        .collect();
    debug!(path = %path.display(), fields = fields.len(), "read header");
    let schema = Arc::new(Schema::new(fields));
    let reader = ReaderBuilder::new(schema.clone())
        .with_format(format)
        .with_batch_size(batch_size)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}

/// Resolve `input` (URL or path) and load it as a table.
#[instrument(level = "info", skip(ctx))]
pub fn load_table(ctx: &ExecutionContext, name: &str, input: &str) -> Result<RecordBatch> {
    let cfg = ctx.config();
    let path = match Source::parse(input) {
        Source::Remote(url) => {
            let client = http_client(cfg.download_timeout_secs.map(Duration::from_secs)).map_err(|source| {
                PipelineError::Fetch {
                    url: url.to_string(),
                    source,
                }
            })?;
            download(&client, &url, &cfg.download_dir, name)?
        }
        Source::Local(path) => path,
    };
    let batch = read_csv(&path, cfg.batch_size)?;
    info!(rows = batch.num_rows(), columns = batch.num_columns(), "loaded");
    Ok(batch)
}
