//! Export handle commands

use chrono::Utc;
use serde_json::json;

use crate::cli::{print_json, StorageArgs};
use crate::error::Result;

/// Guarded preview of a handle by fingerprint
pub fn preview(storage: &StorageArgs, fingerprint: &str) -> Result<()> {
    let lake = storage.open()?;
    print_json(&lake.query().preview_handle(fingerprint)?)
}

/// Delete expired exchange files
pub fn purge(storage: &StorageArgs) -> Result<()> {
    let lake = storage.open()?;
    let purged = lake.cache().purge_expired()?;
    print_json(&json!({ "purged": purged, "at": Utc::now() }))
}
