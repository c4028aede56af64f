//! Ingestion of raw per-activity documents into the analytical store
//!
//! The [`Ingestor`] writes the activity row first, then every child domain
//! whose file is present. Each child domain commits in its own transaction,
//! so one malformed document never blocks the others.

pub mod inserters;
pub mod payload;
pub mod units;
pub mod verify;

pub use payload::{Domain, DomainPayload};
pub use verify::{DomainCheck, VerificationReport};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::db::Database;
use crate::error::{LakeError, Result};

/// Raw documents available for one activity
#[derive(Debug, Clone)]
pub struct ActivityFiles {
    pub activity_id: i64,
    pub dir: PathBuf,
    files: BTreeMap<Domain, PathBuf>,
}

impl ActivityFiles {
    /// Find the domain files present in `dir`
    pub fn discover(activity_id: i64, dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(LakeError::NotFound(format!(
                "Activity directory {}",
                dir.display()
            )));
        }

        let files = Domain::ALL
            .iter()
            .map(|domain| (*domain, dir.join(domain.file_name())))
            .filter(|(_, path)| path.is_file())
            .collect();

        Ok(Self {
            activity_id,
            dir: dir.to_path_buf(),
            files,
        })
    }

    /// Discover files in a directory named after its activity id
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let activity_id = dir
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| {
                LakeError::invalid_query(format!(
                    "{} is not named after an activity id",
                    dir.display()
                ))
            })?;
        Self::discover(activity_id, dir)
    }

    pub fn path(&self, domain: Domain) -> Option<&Path> {
        self.files.get(&domain).map(PathBuf::as_path)
    }

    /// Domains with a file present
    pub fn domains(&self) -> impl Iterator<Item = Domain> + '_ {
        self.files.keys().copied()
    }

    /// Read and parse one domain file, `None` when absent
    pub fn load(&self, domain: Domain) -> Result<Option<serde_json::Value>> {
        let Some(path) = self.path(domain) else {
            return Ok(None);
        };
        let text = fs::read_to_string(path)?;
        let value = serde_json::from_str(&text).map_err(|e| {
            LakeError::validation(domain.as_str(), format!("malformed JSON: {}", e))
        })?;
        Ok(Some(value))
    }

    /// Load and validate one domain, `None` when absent
    pub fn payload(&self, domain: Domain) -> Result<Option<DomainPayload>> {
        self.load(domain)?
            .map(|raw| DomainPayload::parse(domain, self.activity_id, &raw))
            .transpose()
    }
}

/// Outcome of one domain inserter
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainResult {
    pub success: bool,
    pub rows_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainResult {
    fn from_result(result: &Result<usize>) -> Self {
        match result {
            Ok(rows) => Self {
                success: true,
                rows_written: *rows,
                error: None,
            },
            Err(e) => Self {
                success: false,
                rows_written: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Per-domain outcome of ingesting one activity; absent files have no entry
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub activity_id: i64,
    pub domains: BTreeMap<Domain, DomainResult>,
}

impl IngestReport {
    fn new(activity_id: i64) -> Self {
        Self {
            activity_id,
            domains: BTreeMap::new(),
        }
    }

    /// Report for an activity whose ingestion was aborted before any child ran
    pub fn aborted(activity_id: i64, err: &LakeError) -> Self {
        let mut report = Self::new(activity_id);
        report.domains.insert(
            Domain::Activity,
            DomainResult {
                success: false,
                rows_written: 0,
                error: Some(err.to_string()),
            },
        );
        report
    }

    pub fn get(&self, domain: Domain) -> Option<&DomainResult> {
        self.domains.get(&domain)
    }

    /// Whether every attempted domain succeeded
    pub fn is_complete(&self) -> bool {
        self.domains.values().all(|r| r.success)
    }

    /// Domains that failed
    pub fn failed(&self) -> impl Iterator<Item = Domain> + '_ {
        self.domains
            .iter()
            .filter(|(_, r)| !r.success)
            .map(|(d, _)| *d)
    }

    pub fn rows_written(&self) -> usize {
        self.domains.values().map(|r| r.rows_written).sum()
    }

    /// `Ok` when complete, otherwise `PartialIngest` naming each failed domain
    pub fn into_result(self) -> Result<Self> {
        if self.is_complete() {
            return Ok(self);
        }
        let details: Vec<String> = self
            .domains
            .iter()
            .filter_map(|(domain, r)| r.error.as_ref().map(|e| format!("{}: {}", domain, e)))
            .collect();
        Err(LakeError::PartialIngest(format!(
            "activity {}: {}",
            self.activity_id,
            details.join("; ")
        )))
    }
}

impl std::fmt::Display for IngestReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = self.failed().count();
        write!(
            f,
            "Activity {}: {} domains, {} rows",
            self.activity_id,
            self.domains.len(),
            self.rows_written()
        )?;
        if failed > 0 {
            write!(f, ", {} failed", failed)?;
        }
        Ok(())
    }
}

/// Writes raw activity documents through the domain inserters
pub struct Ingestor<'a> {
    db: &'a Database,
}

impl<'a> Ingestor<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Ingest the documents in `dir` for one activity
    pub fn ingest_activity(&self, activity_id: i64, dir: impl AsRef<Path>) -> Result<IngestReport> {
        let files = ActivityFiles::discover(activity_id, dir)?;
        self.ingest(&files)
    }

    /// Ingest discovered files; the activity row must be valid, children fail independently
    pub fn ingest(&self, files: &ActivityFiles) -> Result<IngestReport> {
        self.db.with_activity_lock(files.activity_id, || self.ingest_locked(files))
    }

    fn ingest_locked(&self, files: &ActivityFiles) -> Result<IngestReport> {
        let activity_id = files.activity_id;
        let activity = files.payload(Domain::Activity)?.ok_or_else(|| {
            LakeError::Referential(format!(
                "Activity {} has no {} in {}",
                activity_id,
                Domain::Activity.file_name(),
                files.dir.display()
            ))
        })?;

        let mut report = IngestReport::new(activity_id);
        let rows = self.write(activity_id, &activity)?;
        report
            .domains
            .insert(Domain::Activity, DomainResult::from_result(&Ok(rows)));

        for domain in files.domains().filter(|d| *d != Domain::Activity) {
            let result = files
                .payload(domain)
                .and_then(|payload| match payload {
                    Some(payload) => self.write(activity_id, &payload),
                    None => Ok(0),
                });

            if let Err(e) = &result {
                tracing::warn!(
                    activity_id,
                    domain = %domain,
                    error = %e,
                    "Domain ingestion failed"
                );
            }
            report.domains.insert(domain, DomainResult::from_result(&result));
        }

        tracing::info!(
            activity_id,
            domains = report.domains.len(),
            rows = report.rows_written(),
            "Ingested activity"
        );
        Ok(report)
    }

    /// Ingest every `<root>/<activity_id>/` directory, in ascending id order
    pub fn ingest_all(&self, root: impl AsRef<Path>) -> Result<Vec<IngestReport>> {
        let mut dirs: Vec<(i64, PathBuf)> = fs::read_dir(root.as_ref())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .filter_map(|path| {
                let id = path.file_name()?.to_str()?.parse::<i64>().ok()?;
                Some((id, path))
            })
            .collect();
        dirs.sort_by_key(|(id, _)| *id);

        let mut reports = Vec::with_capacity(dirs.len());
        for (activity_id, dir) in dirs {
            match self.ingest_activity(activity_id, &dir) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    tracing::error!(activity_id, error = %e, "Activity ingestion aborted");
                    reports.push(IngestReport::aborted(activity_id, &e));
                }
            }
        }
        Ok(reports)
    }

    fn write(&self, activity_id: i64, payload: &DomainPayload) -> Result<usize> {
        let rows = self
            .db
            .transaction(|tx| inserters::insert(tx, activity_id, payload))?;
        tracing::debug!(activity_id, domain = %payload.domain(), rows, "Domain written");
        Ok(rows)
    }
}
