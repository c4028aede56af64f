//! Handle cache for materialized query results
//!
//! A fingerprint maps to one Parquet exchange file plus its handle metadata.
//! Expiry is lazy: lookups treat an expired handle (or one whose file is gone)
//! as absent and leave the stale file for [`HandleCache::purge_expired`].

pub mod exchange;
pub mod index;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{LakeError, Result};

use self::index::{HandleIndex, INDEX_FILENAME};

/// Metadata for a materialized result; the rows stay on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportHandle {
    pub fingerprint: String,
    pub path: PathBuf,
    pub row_count: u64,
    pub size_bytes: u64,
    pub columns: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_secs: u64,
}

impl ExportHandle {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.ttl_secs as i64)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// What a materializer reports after writing its file
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    pub row_count: u64,
    pub columns: Vec<String>,
}

/// Fingerprint-keyed cache of exchange files with a time-to-live
pub struct HandleCache {
    dir: PathBuf,
    ttl: Duration,
    index: Mutex<HandleIndex>,
    /// Per-fingerprint locks so concurrent requests materialize once
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl HandleCache {
    /// Open the cache rooted at `dir`, creating it and its index if needed
    pub fn open(dir: impl AsRef<Path>, ttl: Duration) -> Result<Self> {
        let dir = dir.as_ref();
        crate::config::ensure_dir(dir)?;
        let index = HandleIndex::open(dir.join(INDEX_FILENAME))?;

        Ok(Self {
            dir: dir.to_path_buf(),
            ttl,
            index: Mutex::new(index),
            locks: DashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index(&self) -> Result<std::sync::MutexGuard<'_, HandleIndex>> {
        self.index
            .lock()
            .map_err(|_| LakeError::Database("Handle index lock poisoned".to_string()))
    }


    /// Valid handle for a fingerprint, if any
    pub fn lookup(&self, fingerprint: &str) -> Result<Option<ExportHandle>> {
        self.lookup_at(fingerprint, Utc::now())
    }

    pub fn lookup_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Result<Option<ExportHandle>> {
        let Some(handle) = self.index()?.get(fingerprint)? else {
            return Ok(None);
        };

        if handle.is_expired_at(now) {
            tracing::debug!(fingerprint, "Handle expired");
            return Ok(None);
        }
        if !handle.path.exists() {
            tracing::debug!(fingerprint, path = %handle.path.display(), "Handle file missing");
            return Ok(None);
        }
        Ok(Some(handle))
    }

    /// Return the valid handle for `fingerprint`, or run `materialize` to create one.
    ///
    /// `materialize` writes the result to the temp path it is given; the cache
    /// renames it into place once it has succeeded.
    pub fn get_or_materialize<F>(&self, fingerprint: &str, materialize: F) -> Result<ExportHandle>
    where
        F: FnOnce(&Path) -> Result<Materialized>,
    {
        self.get_or_materialize_at(fingerprint, Utc::now(), materialize)
    }

    pub fn get_or_materialize_at<F>(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        materialize: F,
    ) -> Result<ExportHandle>
    where
        F: FnOnce(&Path) -> Result<Materialized>,
    {
        let lock = self
            .locks
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = match lock.lock() {
            Ok(_guard) => self.materialize_locked(fingerprint, now, materialize),
            Err(_) => Err(LakeError::Database("Fingerprint lock poisoned".to_string())),
        };

        drop(lock);
        self.locks.remove_if(fingerprint, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    fn materialize_locked<F>(
        &self,
        fingerprint: &str,
        now: DateTime<Utc>,
        materialize: F,
    ) -> Result<ExportHandle>
    where
        F: FnOnce(&Path) -> Result<Materialized>,
    {
        if let Some(handle) = self.lookup_at(fingerprint, now)? {
            tracing::debug!(fingerprint, path = %handle.path.display(), "Handle cache hit");
            return Ok(handle);
        }

        // The index keeps microseconds
        let created_at = now.trunc_subsecs(6);
        let stem = format!(
            "{}-{}",
            fingerprint.get(..16).unwrap_or(fingerprint),
            created_at.timestamp_micros()
        );
        let path = self.dir.join(format!("{}.parquet", stem));
        let temp_path = self.dir.join(format!("{}.parquet.tmp", stem));

        let materialized = match materialize(&temp_path) {
            Ok(m) => m,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(e);
            }
        };

        // Atomic rename
        fs::rename(&temp_path, &path)
            .map_err(|e| LakeError::export(format!("Failed to rename temp file: {}", e)))?;
        let size_bytes = fs::metadata(&path)?.len();

        let handle = ExportHandle {
            fingerprint: fingerprint.to_string(),
            path,
            row_count: materialized.row_count,
            size_bytes,
            columns: materialized.columns,
            created_at,
            ttl_secs: self.ttl.as_secs(),
        };
        self.index()?.upsert(&handle)?;

        tracing::info!(
            fingerprint,
            rows = handle.row_count,
            bytes = handle.size_bytes,
            "Materialized export"
        );
        Ok(handle)
    }

    /// Valid handle for a fingerprint, or `NotFound`
    pub fn get(&self, fingerprint: &str) -> Result<ExportHandle> {
        self.lookup(fingerprint)?
            .ok_or_else(|| LakeError::NotFound(format!("No valid handle for {}", fingerprint)))
    }

    /// First `limit` rows of a handle's file
    pub fn preview(&self, handle: &ExportHandle, limit: usize) -> Result<Vec<Map<String, Value>>> {
        exchange::read_rows(&handle.path, limit)
    }

    /// Delete expired exchange files and their index rows; returns how many were removed
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let index = self.index()?;
        let mut purged = 0;

        for handle in index.expired(now)? {
            match fs::remove_file(&handle.path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        path = %handle.path.display(),
                        error = %e,
                        "Failed to delete exchange file"
                    );
                    continue;
                }
            }
            if index.remove(&handle.fingerprint, &handle.path)? {
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "Purged expired handles");
        }
        Ok(purged)
    }
}
