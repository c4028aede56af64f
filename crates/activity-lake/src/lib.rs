pub mod cache;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod ingest;
pub mod query;

pub use cache::{ExportHandle, HandleCache};
pub use config::LakeConfig;
pub use db::Database;
pub use error::{LakeError, Result};
pub use guard::{Guarded, OutputGuard};
pub use ingest::{Domain, IngestReport, Ingestor, VerificationReport};
pub use query::{QueryEngine, QueryMode, QueryOptions, QueryOutput, QueryParam, QueryRequest};

use std::path::Path;

use query::AnomalyOptions;

/// The analytical store, its export cache and the configured limits
pub struct Lake {
    config: LakeConfig,
    db: Database,
    cache: HandleCache,
}

impl Lake {
    /// Open the database and exchange directory named by `config`
    pub fn open(config: LakeConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open(&config.db_path)?;
        let cache = HandleCache::open(&config.exchange_dir, config.handle_ttl())?;
        Ok(Self { config, db, cache })
    }

    /// In-memory store with exchange files under `config.exchange_dir` (for testing)
    pub fn open_in_memory(config: LakeConfig) -> Result<Self> {
        config.validate()?;
        let db = Database::open_in_memory()?;
        let cache = HandleCache::open(&config.exchange_dir, config.handle_ttl())?;
        Ok(Self { config, db, cache })
    }

    pub fn config(&self) -> &LakeConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn cache(&self) -> &HandleCache {
        &self.cache
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(&self.db)
    }

    pub fn query(&self) -> QueryEngine<'_> {
        let guard = OutputGuard::from_config(&self.config);
        QueryEngine::new(&self.db, &self.cache, guard).with_anomaly_defaults(AnomalyOptions {
            window: self.config.anomaly_window,
            threshold: self.config.anomaly_threshold,
            limit: self.config.preview_rows,
        })
    }

    /// Ingest one activity directory
    pub fn ingest_activity(&self, activity_id: i64, dir: &Path) -> Result<IngestReport> {
        self.ingestor().ingest_activity(activity_id, dir)
    }

    /// Compare stored row counts with the raw files of one activity
    pub fn verify_activity(&self, activity_id: i64, dir: &Path) -> Result<VerificationReport> {
        let files = ingest::ActivityFiles::discover(activity_id, dir)?;
        ingest::verify::verify_activity(&self.db, &files)
    }
}
