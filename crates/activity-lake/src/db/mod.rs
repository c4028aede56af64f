//! Analytical store handle
//!
//! The [`Database`] is opened once at startup and passed explicitly to the
//! inserters and the query engine. Writes run inside scoped transactions and
//! are serialized per activity; reads use their own cloned connections.

pub mod models;
pub mod schema;

pub use models::*;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use duckdb::{Connection, Transaction};

use crate::error::{LakeError, Result};

/// Keep every connection to the store's own tables: no file scans, no extensions.
/// The setting is database-wide and cannot be turned back on.
fn restrict_external_access(conn: &Connection) -> Result<()> {
    conn.execute_batch("SET enable_external_access = false")
        .map_err(|e| LakeError::Database(format!("Failed to restrict external access: {}", e)))
}

/// DuckDB-backed analytical store
pub struct Database {
    /// Base connection; only locked long enough to clone
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
    /// Per-activity locks so delete/insert pairs for one activity never interleave
    activity_locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl Database {
    /// Open (or create) the database file and ensure the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            crate::config::ensure_dir(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            LakeError::Database(format!("Failed to open {}: {}", path.display(), e))
        })?;

        schema::ensure_schema(&conn)?;
        restrict_external_access(&conn)?;
        tracing::info!(path = %path.display(), "Opened analytical store");

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
            activity_locks: DashMap::new(),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LakeError::Database(format!("Failed to open in-memory database: {}", e)))?;

        schema::ensure_schema(&conn)?;
        restrict_external_access(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
            activity_locks: DashMap::new(),
        })
    }

    /// Database file path, `None` when in memory
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn base(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LakeError::Database("Connection lock poisoned".to_string()))
    }

    /// A new connection to the same database for read queries
    pub fn reader(&self) -> Result<Connection> {
        self.base()?
            .try_clone()
            .map_err(|e| LakeError::Database(format!("Failed to clone connection: {}", e)))
    }

    /// Run `f` holding the write lock for an activity
    ///
    /// The lock entry is dropped once no other caller holds or waits on it.
    pub fn with_activity_lock<T>(
        &self,
        activity_id: i64,
        f: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let lock = self
            .activity_locks
            .entry(activity_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(LakeError::Database(format!(
                "Write lock for activity {} poisoned",
                activity_id
            ))),
        };

        drop(lock);
        self.activity_locks.remove_if(&activity_id, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Run `f` inside one transaction on its own connection; rolled back if `f` fails
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.reader()?;
        let tx = conn
            .transaction()
            .map_err(|e| LakeError::Database(format!("Failed to begin transaction: {}", e)))?;

        let out = f(&tx)?;

        tx.commit()
            .map_err(|e| LakeError::from_duckdb("Failed to commit transaction", e))?;
        Ok(out)
    }

    /// Whether the activity row exists
    pub fn has_activity(&self, activity_id: i64) -> Result<bool> {
        let conn = self.reader()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM activities WHERE activity_id = ?",
                [activity_id],
                |row| row.get(0),
            )
            .map_err(|e| LakeError::Database(e.to_string()))?;
        Ok(count > 0)
    }

    /// Row count of a data table for one activity (or in total for `body_composition`)
    pub fn count_rows(&self, table: &str, activity_id: i64) -> Result<i64> {
        if !schema::DATA_TABLES.contains(&table) {
            return Err(LakeError::invalid_query(format!("Unknown table: {}", table)));
        }
        let conn = self.reader()?;
        let sql = if table == "body_composition" {
            format!("SELECT COUNT(*) FROM {}", table)
        } else {
            format!("SELECT COUNT(*) FROM {} WHERE activity_id = {}", table, activity_id)
        };
        conn.query_row(&sql, [], |row| row.get(0))
            .map_err(|e| LakeError::Database(e.to_string()))
    }
}
