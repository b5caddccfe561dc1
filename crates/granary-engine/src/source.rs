//! Source readers: CSV files, JSON files, and paginated HTTP APIs.
//!
//! Every reader produces the same shape, a `Vec<RawRecord>` in source
//! order with 1-based row numbers. For file sources the path may name a
//! directory, in which case all files with the matching extension are
//! read in lexical order and row numbers continue across files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use granary_types::record::{Columns, RawRecord, Value};

use crate::config::SourceConfig;
use crate::errors::PipelineError;

/// Read every raw record the configured source has to offer.
///
/// # Errors
///
/// [`PipelineError::SourceUnavailable`] if the file/endpoint cannot be
/// reached, [`PipelineError::SourceFormat`] if the payload cannot be
/// parsed as the declared format.
pub async fn read_source(config: &SourceConfig) -> Result<Vec<RawRecord>, PipelineError> {
    let records = match config {
        SourceConfig::Csv { path } => {
            let paths = resolve_paths(Path::new(path), "csv")?;
            read_files(paths, read_csv_file).await?
        }
        SourceConfig::Json { path } => {
            let paths = resolve_paths(Path::new(path), "json")?;
            read_files(paths, read_json_file).await?
        }
        SourceConfig::Api { url, page_size, timeout_secs } => {
            read_api(url, *page_size, *timeout_secs).await?
        }
    };
    info!(kind = config.kind(), rows = records.len(), "source read complete");
    Ok(records)
}

/// Expand a path into the ordered list of files to read.
fn resolve_paths(path: &Path, extension: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        PipelineError::SourceUnavailable(format!("{}: {e}", path.display()))
    })?;
    if !meta.is_dir() {
        return Ok(vec![path.to_path_buf()]);
    }
    let entries = std::fs::read_dir(path).map_err(|e| {
        PipelineError::SourceUnavailable(format!("{}: {e}", path.display()))
    })?;
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            PipelineError::SourceUnavailable(format!("{}: {e}", path.display()))
        })?;
        let candidate = entry.path();
        if candidate.extension().is_some_and(|ext| ext.eq_ignore_ascii_case(extension)) {
            paths.push(candidate);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_files(
    paths: Vec<PathBuf>,
    read_one: fn(&Path, u64) -> Result<Vec<RawRecord>, PipelineError>,
) -> Result<Vec<RawRecord>, PipelineError> {
    tokio::task::spawn_blocking(move || {
        let mut records: Vec<RawRecord> = Vec::new();
        for path in paths {
            let start_row = records.len() as u64 + 1;
            let mut batch = read_one(&path, start_row)?;
            debug!(file = %path.display(), rows = batch.len(), "read source file");
            records.append(&mut batch);
        }
        Ok(records)
    })
    .await
    .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("source reader task: {e}")))?
}

/// CSV cells are untyped text at this stage: empty cells become null,
/// everything else stays text for the validator to coerce.
fn read_csv_file(path: &Path, start_row: u64) -> Result<Vec<RawRecord>, PipelineError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| match e.kind() {
        csv::ErrorKind::Io(_) => {
            PipelineError::SourceUnavailable(format!("{}: {e}", path.display()))
        }
        _ => PipelineError::SourceFormat(format!("{}: {e}", path.display())),
    })?;
    let headers = reader
        .headers()
        .map_err(|e| PipelineError::SourceFormat(format!("{}: {e}", path.display())))?
        .clone();
    let mut records = Vec::new();
    for (offset, result) in reader.records().enumerate() {
        let row = result.map_err(|e| {
            PipelineError::SourceFormat(format!("{}: {e}", path.display()))
        })?;
        let mut columns = Columns::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            let value = if cell.is_empty() {
                Value::Null
            } else {
                Value::Text(cell.to_string())
            };
            columns.insert(header.to_string(), value);
        }
        records.push(RawRecord::new(start_row + offset as u64, columns));
    }
    Ok(records)
}

fn read_json_file(path: &Path, start_row: u64) -> Result<Vec<RawRecord>, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::SourceUnavailable(format!("{}: {e}", path.display()))
    })?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::SourceFormat(format!("{}: {e}", path.display())))?;
    let rows = parsed.as_array().ok_or_else(|| {
        PipelineError::SourceFormat(format!(
            "{}: expected a top-level JSON array",
            path.display()
        ))
    })?;
    json_rows_to_records(rows, start_row, &path.display().to_string())
}

fn json_rows_to_records(
    rows: &[serde_json::Value],
    start_row: u64,
    origin: &str,
) -> Result<Vec<RawRecord>, PipelineError> {
    let mut records = Vec::with_capacity(rows.len());
    for (offset, row) in rows.iter().enumerate() {
        let row_num = start_row + offset as u64;
        let object = row.as_object().ok_or_else(|| {
            PipelineError::SourceFormat(format!("{origin}: row {row_num} is not an object"))
        })?;
        let mut columns = Columns::new();
        for (name, json) in object {
            let value = Value::from_json(json).ok_or_else(|| {
                PipelineError::SourceFormat(format!(
                    "{origin}: row {row_num} column '{name}' holds a nested value"
                ))
            })?;
            columns.insert(name.clone(), value);
        }
        records.push(RawRecord::new(row_num, columns));
    }
    Ok(records)
}

/// Page through an API endpoint with `page`/`page_size` query parameters,
/// starting at page 1 and stopping at the first empty page.
async fn read_api(
    url: &str,
    page_size: u32,
    timeout_secs: u64,
) -> Result<Vec<RawRecord>, PipelineError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| PipelineError::Infrastructure(anyhow::anyhow!("http client: {e}")))?;

    let mut records: Vec<RawRecord> = Vec::new();
    let mut page: u32 = 1;
    loop {
        let response = client
            .get(url)
            .query(&[("page", page), ("page_size", page_size)])
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(PipelineError::SourceUnavailable(format!(
                "{url}: server returned {}",
                response.status()
            )));
        }
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| PipelineError::SourceFormat(format!("{url} page {page}: {e}")))?;
        if rows.is_empty() {
            break;
        }
        let start_row = records.len() as u64 + 1;
        let origin = format!("{url} page {page}");
        records.extend(json_rows_to_records(&rows, start_row, &origin)?);
        page += 1;
    }
    Ok(records)
}
