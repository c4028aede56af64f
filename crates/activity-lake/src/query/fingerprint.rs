//! Cache keys for materialized queries

use sha2::{Digest, Sha256};

use super::sql::normalize;
use super::QueryParam;

/// SHA-256 of the normalized query text and the JSON-encoded parameters, hex encoded
pub fn fingerprint(sql: &str, params: &[QueryParam]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(sql).as_bytes());
    hasher.update(b"\n");
    hasher.update(serde_json::to_string(params).unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_across_formatting() {
        let a = fingerprint("SELECT * FROM splits WHERE activity_id = ?", &[QueryParam::Int(1)]);
        let b = fingerprint(
            "select *\n  from splits\twhere activity_id = ?;",
            &[QueryParam::Int(1)],
        );
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_params_change_fingerprint() {
        let sql = "SELECT * FROM splits WHERE activity_id = ?";
        assert_ne!(
            fingerprint(sql, &[QueryParam::Int(1)]),
            fingerprint(sql, &[QueryParam::Int(2)])
        );
        assert_ne!(
            fingerprint(sql, &[QueryParam::Int(1)]),
            fingerprint(sql, &[QueryParam::Text("1".to_string())])
        );
    }

    #[test]
    fn test_literal_case_matters() {
        assert_ne!(
            fingerprint("SELECT * FROM activities WHERE activity_type = 'Running'", &[]),
            fingerprint("SELECT * FROM activities WHERE activity_type = 'running'", &[])
        );
    }
}
