//! SQLite index of materialized handles
//!
//! One row per exchange file. A fingerprint re-materialized after expiry gets
//! a second row; lookups read the newest one and purges see every file.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{LakeError, Result};

use super::ExportHandle;

/// Index file name inside the exchange directory
pub const INDEX_FILENAME: &str = "handles.db";

pub struct HandleIndex {
    conn: Connection,
}

impl HandleIndex {
    /// Open or create the index
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .map_err(|e| LakeError::Database(format!("Failed to open handle index: {}", e)))?;

        let index = Self { conn };
        index.migrate()?;
        Ok(index)
    }

    /// Open an in-memory index (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LakeError::Database(format!("Failed to open in-memory index: {}", e)))?;

        let index = Self { conn };
        index.migrate()?;
        Ok(index)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS handles (
                    fingerprint TEXT NOT NULL,
                    path TEXT NOT NULL,
                    row_count INTEGER NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    columns TEXT NOT NULL,
                    created_at_us INTEGER NOT NULL,
                    ttl_secs INTEGER NOT NULL,
                    PRIMARY KEY (fingerprint, path)
                );

                CREATE INDEX IF NOT EXISTS idx_handles_created
                ON handles(created_at_us);
                "#,
            )
            .map_err(|e| LakeError::Database(format!("Failed to run index migrations: {}", e)))?;

        Ok(())
    }

    /// Record a handle; an existing row for the same file is replaced
    pub fn upsert(&self, handle: &ExportHandle) -> Result<()> {
        let columns = serde_json::to_string(&handle.columns)?;

        self.conn
            .execute(
                "INSERT INTO handles (
                     fingerprint, path, row_count, size_bytes, columns, created_at_us, ttl_secs
                 )
                 VALUES (?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT (fingerprint, path) DO UPDATE SET
                     row_count = excluded.row_count,
                     size_bytes = excluded.size_bytes,
                     columns = excluded.columns,
                     created_at_us = excluded.created_at_us,
                     ttl_secs = excluded.ttl_secs",
                params![
                    handle.fingerprint,
                    handle.path.to_string_lossy(),
                    handle.row_count as i64,
                    handle.size_bytes as i64,
                    columns,
                    handle.created_at.timestamp_micros(),
                    handle.ttl_secs as i64,
                ],
            )
            .map_err(|e| LakeError::Database(format!("Failed to record handle: {}", e)))?;

        Ok(())
    }

    /// Newest handle recorded for a fingerprint, regardless of expiry
    pub fn get(&self, fingerprint: &str) -> Result<Option<ExportHandle>> {
        self.conn
            .query_row(
                "SELECT fingerprint, path, row_count, size_bytes, columns, created_at_us, ttl_secs
                 FROM handles
                 WHERE fingerprint = ?
                 ORDER BY created_at_us DESC
                 LIMIT 1",
                params![fingerprint],
                row_to_handle,
            )
            .optional()
            .map_err(|e| LakeError::Database(format!("Failed to get handle: {}", e)))
    }

    /// Every handle expired at `now`, superseded ones included
    pub fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ExportHandle>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT fingerprint, path, row_count, size_bytes, columns, created_at_us, ttl_secs
                 FROM handles
                 WHERE created_at_us + ttl_secs * 1000000 <= ?
                 ORDER BY created_at_us",
            )
            .map_err(|e| LakeError::Database(format!("Failed to prepare query: {}", e)))?;

        let handles = stmt
            .query_map(params![now.timestamp_micros()], row_to_handle)
            .map_err(|e| LakeError::Database(format!("Failed to query handles: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| LakeError::Database(format!("Failed to read handles: {}", e)))?;

        Ok(handles)
    }

    /// Remove the row for one file of a fingerprint
    pub fn remove(&self, fingerprint: &str, path: &Path) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM handles WHERE fingerprint = ? AND path = ?",
                params![fingerprint, path.to_string_lossy()],
            )
            .map_err(|e| LakeError::Database(format!("Failed to remove handle: {}", e)))?;

        Ok(removed > 0)
    }

}

fn row_to_handle(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExportHandle> {
    let columns: String = row.get(4)?;
    let created_at_us: i64 = row.get(5)?;

    Ok(ExportHandle {
        fingerprint: row.get(0)?,
        path: PathBuf::from(row.get::<_, String>(1)?),
        row_count: row.get::<_, i64>(2)? as u64,
        size_bytes: row.get::<_, i64>(3)? as u64,
        columns: serde_json::from_str(&columns).unwrap_or_default(),
        created_at: DateTime::from_timestamp_micros(created_at_us).unwrap_or_default(),
        ttl_secs: row.get::<_, i64>(6)? as u64,
    })
}
