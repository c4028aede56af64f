//! Ingestion commands

use std::path::PathBuf;

use serde_json::json;

use crate::cli::{print_json, StorageArgs};
use crate::error::{LakeError, Result};

/// Create the database and exchange directory
pub fn init(storage: &StorageArgs) -> Result<()> {
    let lake = storage.open()?;
    let config = lake.config();
    print_json(&json!({
        "db_path": config.db_path,
        "exchange_dir": config.exchange_dir,
        "row_ceiling": config.row_ceiling,
        "handle_ttl_secs": config.handle_ttl_secs,
    }))
}

/// Ingest one activity directory; fails when any domain failed
pub fn ingest(storage: &StorageArgs, activity_id: i64, dir: PathBuf) -> Result<()> {
    let lake = storage.open()?;
    let report = lake.ingest_activity(activity_id, &dir)?;
    print_json(&report)?;
    report.into_result().map(|_| ())
}

/// Ingest every activity directory under `root`
pub fn ingest_all(storage: &StorageArgs, root: PathBuf) -> Result<()> {
    let lake = storage.open()?;
    let reports = lake.ingestor().ingest_all(&root)?;
    let failed = reports.iter().filter(|r| !r.is_complete()).count();
    print_json(&reports)?;

    if failed == 0 {
        Ok(())
    } else {
        Err(LakeError::PartialIngest(format!(
            "{} of {} activities had failures",
            failed,
            reports.len()
        )))
    }
}

/// Compare stored rows with the raw files
pub fn verify(storage: &StorageArgs, activity_id: i64, dir: PathBuf) -> Result<()> {
    let lake = storage.open()?;
    let report = lake.verify_activity(activity_id, &dir)?;
    print_json(&report)?;
    report.into_result().map(|_| ())
}
