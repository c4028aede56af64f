//! Size guarantees for caller-facing results
//!
//! Every result handed to the caller passes through the [`OutputGuard`]. Oversized
//! payloads are shrunk step by step (rows truncated, low-priority fields dropped)
//! and a warning naming the alternative is attached. The guard never fails a
//! request except for the inline row ceiling, which is a capacity error.

use serde::Serialize;

use crate::config::LakeConfig;
use crate::error::{LakeError, Result};

/// A guarded payload with the warnings raised while fitting it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Guarded<T> {
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub truncated: bool,
}

impl<T> Guarded<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            truncated: false,
        }
    }

    fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        if !self.warnings.contains(&warning) {
            self.warnings.push(warning);
        }
        self.truncated = true;
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Guarded<U> {
        Guarded {
            data: f(self.data),
            warnings: self.warnings,
            truncated: self.truncated,
        }
    }
}

/// A payload that can give up its least important content to fit a size limit
pub trait Shrink {
    /// Drop the lowest-priority piece; returns a warning, or `None` once nothing is left to drop
    fn shrink(&mut self) -> Option<String>;
}

/// Enforces the inline row ceiling, the preview row limit and the JSON size limit
#[derive(Debug, Clone, Copy)]
pub struct OutputGuard {
    pub max_json_bytes: usize,
    pub preview_rows: usize,
    pub row_ceiling: u64,
}

impl Default for OutputGuard {
    fn default() -> Self {
        Self {
            max_json_bytes: crate::config::DEFAULT_MAX_JSON_BYTES,
            preview_rows: crate::config::DEFAULT_PREVIEW_ROWS,
            row_ceiling: crate::config::DEFAULT_ROW_CEILING,
        }
    }
}

impl OutputGuard {
    pub fn from_config(config: &LakeConfig) -> Self {
        Self {
            max_json_bytes: config.max_json_bytes,
            preview_rows: config.preview_rows,
            row_ceiling: config.row_ceiling,
        }
    }

    /// Refuse inline results above the ceiling
    pub fn check_row_ceiling(&self, actual: u64) -> Result<()> {
        if actual > self.row_ceiling {
            return Err(LakeError::capacity(actual, self.row_ceiling));
        }
        Ok(())
    }

    /// Keep at most `preview_rows` rows
    pub fn preview<T>(&self, mut rows: Vec<T>) -> Guarded<Vec<T>> {
        let total = rows.len();
        let keep = total.min(self.preview_rows);
        rows.truncate(keep);

        let mut guarded = Guarded::new(rows);
        if total > keep {
            guarded.warn(format!(
                "Showing {} of {} rows; use export mode for the full result",
                keep, total
            ));
        }
        guarded
    }

    /// Serialized size of a guarded envelope
    pub fn json_size<T: Serialize>(value: &T) -> usize {
        serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
    }

    /// Shrink `guarded.data` until the whole envelope fits in `max_json_bytes`
    pub fn fit<T: Serialize + Shrink>(&self, mut guarded: Guarded<T>) -> Guarded<T> {
        while Self::json_size(&guarded) > self.max_json_bytes {
            match guarded.data.shrink() {
                Some(warning) => guarded.warn(warning),
                None => {
                    tracing::warn!(
                        limit = self.max_json_bytes,
                        size = Self::json_size(&guarded),
                        "Result cannot be reduced below the JSON limit"
                    );
                    break;
                }
            }
        }
        guarded
    }
}

/// JSON object rows: trailing rows go first, then trailing columns
impl Shrink for Vec<serde_json::Map<String, serde_json::Value>> {
    fn shrink(&mut self) -> Option<String> {
        if self.len() > 1 {
            self.pop();
            return Some(
                "Rows dropped to fit the size limit; use export mode for the full result"
                    .to_string(),
            );
        }
        let row = self.first_mut()?;
        if row.len() > 1 {
            let last = row.keys().next_back().cloned()?;
            row.remove(&last);
            return Some("Columns dropped to fit the size limit; select fewer columns".to_string());
        }
        self.pop().map(|_| "Row too large to show inline; use export mode".to_string())
    }
}
