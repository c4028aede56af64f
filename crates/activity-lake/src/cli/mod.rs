//! Command-line front end
//!
//! Commands print one JSON document to stdout; logs go to stderr.

pub mod commands;

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

use crate::config::LakeConfig;
use crate::error::{LakeError, Result};
use crate::ingest::payload::parse_local_datetime;
use crate::Lake;

/// Storage overrides shared by every command
#[derive(Debug, Clone, Default)]
pub struct StorageArgs {
    pub config: Option<PathBuf>,
    pub db: Option<PathBuf>,
    pub exchange_dir: Option<PathBuf>,
}

impl StorageArgs {
    /// Config file (or defaults) with command-line overrides applied
    pub fn resolve(&self) -> Result<LakeConfig> {
        let mut config = match &self.config {
            Some(path) => LakeConfig::from_file(path)?,
            None => LakeConfig::load()?,
        };
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(dir) = &self.exchange_dir {
            config.exchange_dir = dir.clone();
        }
        Ok(config)
    }

    pub fn open(&self) -> Result<Lake> {
        Lake::open(self.resolve()?)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Parse `YYYY-MM-DD` (midnight) or a local date-time
pub fn parse_time(value: &str) -> Result<NaiveDateTime> {
    parse_local_datetime(value)
        .or_else(|| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| {
            LakeError::invalid_query(format!(
                "Invalid time {}, expected YYYY-MM-DD or YYYY-MM-DD HH:MM:SS",
                value
            ))
        })
}
