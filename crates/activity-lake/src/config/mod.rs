//! Configuration for the lake: storage paths, output ceilings and cache TTL

use crate::error::{LakeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default directory name under the platform config/data dirs
const APP_DIR_NAME: &str = "activity-lake";

/// Config file name inside the config directory
const CONFIG_FILENAME: &str = "config.json";

/// Inline row ceiling for bounded-raw results
pub const DEFAULT_ROW_CEILING: u64 = 10_000;

/// Maximum rows in a tabular preview
pub const DEFAULT_PREVIEW_ROWS: usize = 10;

/// Maximum serialized size of an inline JSON payload
pub const DEFAULT_MAX_JSON_BYTES: usize = 1024;

/// Export handle time-to-live (1 hour)
pub const DEFAULT_HANDLE_TTL: Duration = Duration::from_secs(3600);

/// Default z-score above which a point is anomalous
pub const DEFAULT_ANOMALY_THRESHOLD: f64 = 2.0;

/// Default number of neighbours on each side of a point
pub const DEFAULT_ANOMALY_WINDOW: usize = 5;

/// Get the configuration directory path
/// Returns ~/.config/activity-lake on Unix, ~/Library/Application Support/activity-lake on macOS
pub fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .ok_or_else(|| LakeError::config("Could not determine config directory"))
}

/// Get the data directory path holding the database and exchange files
pub fn data_dir() -> Result<PathBuf> {
    dirs::data_local_dir()
        .map(|p| p.join(APP_DIR_NAME))
        .ok_or_else(|| LakeError::config("Could not determine data directory"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Lake configuration.
///
/// Every field has a default, so a partial `config.json` only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeConfig {
    /// DuckDB database file
    pub db_path: PathBuf,

    /// Directory for materialized exchange files and the handle index
    pub exchange_dir: PathBuf,

    /// Maximum rows returned inline by bounded-raw queries
    pub row_ceiling: u64,

    /// Maximum rows in a tabular preview
    pub preview_rows: usize,

    /// Maximum serialized JSON size for inline payloads
    pub max_json_bytes: usize,

    /// Export handle TTL in seconds
    pub handle_ttl_secs: u64,

    /// z-score threshold for anomaly detection
    pub anomaly_threshold: f64,

    /// Neighbours on each side of a point used for anomaly detection
    pub anomaly_window: usize,
}

impl Default for LakeConfig {
    fn default() -> Self {
        let base = data_dir().unwrap_or_else(|_| PathBuf::from(".").join(APP_DIR_NAME));
        Self::with_base_dir(base)
    }
}

impl LakeConfig {
    /// Default configuration rooted at a custom directory
    pub fn with_base_dir(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            db_path: base.join("lake.duckdb"),
            exchange_dir: base.join("exchange"),
            row_ceiling: DEFAULT_ROW_CEILING,
            preview_rows: DEFAULT_PREVIEW_ROWS,
            max_json_bytes: DEFAULT_MAX_JSON_BYTES,
            handle_ttl_secs: DEFAULT_HANDLE_TTL.as_secs(),
            anomaly_threshold: DEFAULT_ANOMALY_THRESHOLD,
            anomaly_window: DEFAULT_ANOMALY_WINDOW,
        }
    }

    /// Load from the default config file, falling back to defaults when absent
    pub fn load() -> Result<Self> {
        let path = config_dir()?.join(CONFIG_FILENAME);
        if path.exists() {
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load and validate a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: LakeConfig = serde_json::from_str(&json)
            .map_err(|e| LakeError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Reject values that would disable the output guarantees
    pub fn validate(&self) -> Result<()> {
        if self.row_ceiling == 0 {
            return Err(LakeError::config("row_ceiling must be greater than zero"));
        }
        if self.preview_rows == 0 || self.preview_rows as u64 > self.row_ceiling {
            return Err(LakeError::config(format!(
                "preview_rows must be between 1 and row_ceiling ({})",
                self.row_ceiling
            )));
        }
        if self.max_json_bytes < 128 {
            return Err(LakeError::config("max_json_bytes must be at least 128"));
        }
        if self.handle_ttl_secs == 0 {
            return Err(LakeError::config("handle_ttl_secs must be greater than zero"));
        }
        if !(self.anomaly_threshold.is_finite() && self.anomaly_threshold > 0.0) {
            return Err(LakeError::config("anomaly_threshold must be a positive number"));
        }
        if self.anomaly_window == 0 {
            return Err(LakeError::config("anomaly_window must be greater than zero"));
        }
        Ok(())
    }

    pub fn handle_ttl(&self) -> Duration {
        Duration::from_secs(self.handle_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_guard_limits() {
        let config = LakeConfig::with_base_dir("/tmp/lake");
        assert_eq!(config.row_ceiling, 10_000);
        assert_eq!(config.preview_rows, 10);
        assert_eq!(config.max_json_bytes, 1024);
        assert_eq!(config.handle_ttl(), Duration::from_secs(3600));
        assert_eq!(config.db_path, PathBuf::from("/tmp/lake/lake.duckdb"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_overrides_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"row_ceiling": 500, "anomaly_threshold": 3.0}"#).unwrap();

        let config = LakeConfig::from_file(&path).unwrap();
        assert_eq!(config.row_ceiling, 500);
        assert_eq!(config.anomaly_threshold, 3.0);
        assert_eq!(config.preview_rows, DEFAULT_PREVIEW_ROWS);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = LakeConfig::with_base_dir("/tmp/lake");
        config.row_ceiling = 0;
        assert!(matches!(config.validate(), Err(LakeError::Config(_))));

        let mut config = LakeConfig::with_base_dir("/tmp/lake");
        config.preview_rows = 20;
        config.row_ceiling = 10;
        assert!(config.validate().is_err());

        let mut config = LakeConfig::with_base_dir("/tmp/lake");
        config.anomaly_threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_data_dir_name() {
        if let Ok(dir) = data_dir() {
            assert!(dir.ends_with("activity-lake"));
        }
    }
}
