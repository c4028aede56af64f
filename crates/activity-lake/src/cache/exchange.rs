//! Parquet exchange files
//!
//! Materialized results are written as ZSTD-compressed Parquet so that the
//! caller can read them with any columnar tool.

use std::fs::{self, File};
use std::path::Path;

use arrow::datatypes::SchemaRef;
use arrow::json::writer::{JsonArray, WriterBuilder};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};

use crate::error::{LakeError, Result};

/// Write record batches to `path`; a file is produced even for zero batches
pub fn write_batches(path: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<u64> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(path)
        .map_err(|e| LakeError::export(format!("Failed to create {}: {}", path.display(), e)))?;

    let props = WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build();

    let mut writer = ArrowWriter::try_new(file, schema, Some(props))
        .map_err(|e| LakeError::export(format!("Failed to create Parquet writer: {}", e)))?;

    let mut rows = 0u64;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| LakeError::export(format!("Failed to write batch: {}", e)))?;
        rows += batch.num_rows() as u64;
    }

    writer
        .close()
        .map_err(|e| LakeError::export(format!("Failed to close writer: {}", e)))?;

    Ok(rows)
}

/// Read at most `limit` rows back as JSON objects
pub fn read_rows(path: &Path, limit: usize) -> Result<Vec<Map<String, Value>>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let file = File::open(path)
        .map_err(|e| LakeError::NotFound(format!("Exchange file {}: {}", path.display(), e)))?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| LakeError::export(format!("Failed to create reader: {}", e)))?
        .with_batch_size(limit)
        .with_limit(limit)
        .build()
        .map_err(|e| LakeError::export(format!("Failed to build reader: {}", e)))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LakeError::export(format!("Failed to read batches: {}", e)))?;

    let mut rows = batches_to_rows(&batches)?;
    rows.truncate(limit);
    Ok(rows)
}

/// Render record batches as JSON objects, nulls kept as explicit `null`s
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Map<String, Value>>> {
    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| LakeError::export(format!("Failed to render rows: {}", e)))?;
    }
    writer
        .finish()
        .map_err(|e| LakeError::export(format!("Failed to render rows: {}", e)))?;

    let bytes = writer.into_inner();
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}
