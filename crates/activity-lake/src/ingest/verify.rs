//! Post-ingestion verification
//!
//! Re-reads the raw documents of an activity and compares the rows each one
//! should produce with what the store holds.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::db::Database;
use crate::error::{LakeError, Result};

use super::payload::{Domain, DomainPayload};
use super::ActivityFiles;

/// Expected versus stored rows for one domain
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainCheck {
    /// `None` when the raw document does not validate
    pub expected: Option<usize>,
    pub stored: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DomainCheck {
    pub fn matches(&self) -> bool {
        self.expected == Some(self.stored)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub activity_id: i64,
    pub checks: BTreeMap<Domain, DomainCheck>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.checks.values().all(DomainCheck::matches)
    }

    pub fn mismatches(&self) -> impl Iterator<Item = (Domain, &DomainCheck)> + '_ {
        self.checks
            .iter()
            .filter(|(_, c)| !c.matches())
            .map(|(d, c)| (*d, c))
    }

    /// Turn any mismatch into a [`LakeError::Verification`]
    pub fn into_result(self) -> Result<Self> {
        if self.is_consistent() {
            return Ok(self);
        }
        let details: Vec<String> = self
            .mismatches()
            .map(|(domain, check)| match check.expected {
                Some(expected) => {
                    format!("{}: expected {}, stored {}", domain, expected, check.stored)
                }
                None => format!("{}: payload invalid, stored {}", domain, check.stored),
            })
            .collect();
        Err(LakeError::Verification(format!(
            "activity {}: {}",
            self.activity_id,
            details.join("; ")
        )))
    }
}

/// Compare every present raw document of an activity with the stored rows
pub fn verify_activity(db: &Database, files: &ActivityFiles) -> Result<VerificationReport> {
    let conn = db.reader()?;
    let mut checks = BTreeMap::new();

    for domain in files.domains() {
        let payload = files.payload(domain);
        let stored = match &payload {
            Ok(Some(DomainPayload::BodyComposition(rows))) => {
                let mut count = 0usize;
                for row in rows {
                    let n: i64 = conn
                        .query_row(
                            "SELECT COUNT(*) FROM body_composition WHERE date = ?",
                            duckdb::params![row.date],
                            |r| r.get(0),
                        )
                        .map_err(|e| LakeError::Database(e.to_string()))?;
                    count += n as usize;
                }
                count
            }
            _ => db.count_rows(domain.table_name(), files.activity_id)? as usize,
        };

        let check = match payload {
            Ok(Some(payload)) => DomainCheck {
                expected: Some(payload.row_count()),
                stored,
                error: None,
            },
            Ok(None) => continue,
            Err(e) => DomainCheck {
                expected: None,
                stored,
                error: Some(e.to_string()),
            },
        };

        if !check.matches() {
            tracing::warn!(
                activity_id = files.activity_id,
                domain = %domain,
                expected = ?check.expected,
                stored = check.stored,
                "Row count mismatch"
            );
        }
        checks.insert(domain, check);
    }

    Ok(VerificationReport {
        activity_id: files.activity_id,
        checks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn setup(temp: &TempDir) {
        let dir = temp.path();
        fs::write(
            dir.join("activity.json"),
            json!({"activityId": 5, "startTimeLocal": "2024-12-01 07:00:00"}).to_string(),
        )
        .unwrap();
        fs::write(
            dir.join("splits.json"),
            json!({"lapDTOs": [
                {"distance": 1000.0, "duration": 300.0},
                {"distance": 1000.0, "duration": 305.0}
            ]})
            .to_string(),
        )
        .unwrap();
    }

    #[test]
    fn test_verify_after_ingest_is_consistent() {
        let temp = TempDir::new().unwrap();
        setup(&temp);
        let db = Database::open_in_memory().unwrap();
        Ingestor::new(&db).ingest_activity(5, temp.path()).unwrap();

        let files = ActivityFiles::discover(5, temp.path()).unwrap();
        let report = verify_activity(&db, &files).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.checks[&Domain::Splits].stored, 2);
    }

    #[test]
    fn test_verify_reports_mismatch() {
        let temp = TempDir::new().unwrap();
        setup(&temp);
        let db = Database::open_in_memory().unwrap();
        Ingestor::new(&db).ingest_activity(5, temp.path()).unwrap();

        let conn = db.reader().unwrap();
        conn.execute("DELETE FROM splits WHERE split_index = 1", []).unwrap();

        let files = ActivityFiles::discover(5, temp.path()).unwrap();
        let report = verify_activity(&db, &files).unwrap();
        assert!(!report.is_consistent());

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, LakeError::Verification(_)));
        assert!(err.to_string().contains("splits: expected 2, stored 1"));
    }
}
