use thiserror::Error;

/// Main error type for activity-lake
#[derive(Error, Debug)]
pub enum LakeError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid {domain} payload: {message}")]
    Validation { domain: String, message: String },

    #[error("Referential error: {0}")]
    Referential(String),

    #[error(
        "Result has {actual} rows, above the inline ceiling of {ceiling}. Use {suggestion} instead."
    )]
    Capacity {
        actual: u64,
        ceiling: u64,
        suggestion: String,
    },

    #[error("Export error: {0}")]
    Export(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Ingestion incomplete: {0}")]
    PartialIngest(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LakeError>;

impl LakeError {
    /// Create a validation error for a domain
    pub fn validation(domain: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            domain: domain.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error from a message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid query error from a message
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an export error from a message
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Capacity error suggesting the aggregate or export mode
    pub fn capacity(actual: u64, ceiling: u64) -> Self {
        Self::Capacity {
            actual,
            ceiling,
            suggestion: "statistics mode to aggregate, or export mode to materialize a handle"
                .to_string(),
        }
    }

    /// Map a DuckDB error, classifying foreign-key violations as referential misuse
    pub fn from_duckdb(context: &str, err: duckdb::Error) -> Self {
        let message = err.to_string();
        if message.to_ascii_lowercase().contains("foreign key") {
            Self::Referential(format!("{}: {}", context, message))
        } else {
            Self::Database(format!("{}: {}", context, message))
        }
    }

    /// Whether the caller can recover by retrying or switching modes
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::Capacity { .. }
                | Self::Export(_)
                | Self::InvalidQuery(_)
                | Self::NotFound(_)
        )
    }
}
