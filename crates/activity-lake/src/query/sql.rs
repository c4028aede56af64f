//! SQL text helpers: read-only validation, normalization and identifiers

use crate::error::{LakeError, Result};

/// Leading keywords of statements the query surface accepts
const READ_ONLY_LEADS: &[&str] = &["select", "with", "from", "describe", "summarize"];

/// Keywords that change state or reach outside the store
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "create", "alter", "drop", "truncate", "attach", "detach",
    "copy", "export", "import", "install", "load", "pragma", "set", "reset", "call", "vacuum",
    "checkpoint", "begin", "commit", "rollback", "grant", "revoke", "merge", "use",
];

/// Table functions that read files directly
const FORBIDDEN_FUNCTION_PREFIXES: &[&str] = &["read_", "glob", "parquet_", "sniff_"];

#[derive(Clone, Copy, PartialEq)]
enum State {
    Code,
    SingleQuoted,
    DoubleQuoted,
    LineComment,
    BlockComment,
}

/// Replace quoted identifiers and comments with spaces and each string
/// literal with a lone `'`, keeping only the code that keywords can appear in
fn code_only(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '\'' => {
                    state = State::SingleQuoted;
                    out.push_str(" ' ");
                }
                '"' => {
                    state = State::DoubleQuoted;
                    out.push(' ');
                }
                '-' if chars.peek() == Some(&'-') => {
                    chars.next();
                    state = State::LineComment;
                    out.push(' ');
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    state = State::BlockComment;
                    out.push(' ');
                }
                _ => out.push(c),
            },
            State::SingleQuoted if c == '\'' => state = State::Code,
            State::DoubleQuoted if c == '"' => state = State::Code,
            State::LineComment if c == '\n' => {
                state = State::Code;
                out.push('\n');
            }
            State::BlockComment if c == '*' && chars.peek() == Some(&'/') => {
                chars.next();
                state = State::Code;
            }
            _ => {}
        }
    }
    out
}

/// Whether a string literal stands where a table belongs, as in `FROM 'x.csv'`
fn literal_as_table(code: &str) -> bool {
    let mut previous = "";
    for token in code
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '\''))
        .filter(|t| !t.is_empty())
    {
        if token == "'" && matches!(previous, "from" | "join" | "describe" | "summarize") {
            return true;
        }
        previous = token;
    }
    false
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut candidate = sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Reject anything but one read-only statement; returns the statement without trailing `;`
pub fn validate_read_only(sql: &str) -> Result<&str> {
    let candidate = strip_trailing_semicolons(sql);
    if candidate.is_empty() {
        return Err(LakeError::invalid_query("Query is empty"));
    }

    let code = code_only(candidate).to_ascii_lowercase();
    if code.contains(';') {
        return Err(LakeError::invalid_query(
            "Multiple statements are not allowed; submit exactly one read-only statement",
        ));
    }

    let tokens: Vec<&str> = code
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .filter(|t| !t.is_empty())
        .collect();

    let lead = tokens.first().copied().unwrap_or_default();
    if !READ_ONLY_LEADS.contains(&lead) {
        return Err(LakeError::invalid_query(format!(
            "Statements starting with `{}` are not allowed; \
             use SELECT, WITH, FROM, DESCRIBE or SUMMARIZE",
            lead
        )));
    }

    let forbidden = |t: &&str| {
        FORBIDDEN_KEYWORDS.contains(t)
            || FORBIDDEN_FUNCTION_PREFIXES.iter().any(|p| t.starts_with(p))
    };
    if let Some(keyword) = tokens.iter().copied().find(forbidden) {
        return Err(LakeError::invalid_query(format!(
            "`{}` is not allowed in a read-only query",
            keyword
        )));
    }

    if literal_as_table(&code) {
        return Err(LakeError::invalid_query(
            "Reading files is not allowed; query the store's tables",
        ));
    }

    Ok(candidate)
}

/// Canonical form used for fingerprints: comments dropped, whitespace runs
/// collapsed and code lower-cased outside quotes, trailing `;` removed
pub fn normalize(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut state = State::Code;
    let mut pending_space = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match state {
            State::Code => {
                match c {
                    c if c.is_whitespace() => {
                        pending_space = true;
                        continue;
                    }
                    '-' if chars.peek() == Some(&'-') => {
                        chars.next();
                        state = State::LineComment;
                        pending_space = true;
                        continue;
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        state = State::BlockComment;
                        pending_space = true;
                        continue;
                    }
                    '\'' => state = State::SingleQuoted,
                    '"' => state = State::DoubleQuoted,
                    _ => {}
                }
                if pending_space && !out.is_empty() {
                    out.push(' ');
                }
                pending_space = false;
                out.push(c.to_ascii_lowercase());
            }
            State::SingleQuoted | State::DoubleQuoted => {
                out.push(c);
                let close = if state == State::SingleQuoted { '\'' } else { '"' };
                if c == close {
                    state = State::Code;
                }
            }
            State::LineComment => {
                if c == '\n' {
                    state = State::Code;
                }
            }
            State::BlockComment => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
        }
    }
    strip_trailing_semicolons(&out).to_string()
}

/// Whether `name` is a plain SQL identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quote a validated identifier
pub fn quote_ident(name: &str) -> Result<String> {
    if !is_identifier(name) {
        return Err(LakeError::invalid_query(format!("Invalid column name: {}", name)));
    }
    Ok(format!("\"{}\"", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_read_only_statements() {
        assert_eq!(validate_read_only("SELECT 1;").unwrap(), "SELECT 1");
        assert!(validate_read_only("with t as (select 1) select * from t").is_ok());
        assert!(validate_read_only("FROM activities").is_ok());
        assert!(validate_read_only("DESCRIBE splits").is_ok());
        assert!(validate_read_only("SUMMARIZE time_series_metrics").is_ok());
    }

    #[test]
    fn test_rejects_mutations() {
        for sql in [
            "DELETE FROM activities",
            "SELECT 1; DROP TABLE activities",
            "WITH x AS (SELECT 1) INSERT INTO activities SELECT * FROM x",
            "SELECT * FROM read_csv('/etc/passwd')",
            "COPY activities TO 'out.csv'",
            "",
        ] {
            assert!(
                matches!(validate_read_only(sql), Err(LakeError::InvalidQuery(_))),
                "accepted {:?}",
                sql
            );
        }
    }

    #[test]
    fn test_keywords_inside_literals_are_ignored() {
        let sql = "SELECT * FROM activities WHERE activity_name = 'delete me; now'";
        assert!(validate_read_only(sql).is_ok());
        assert!(validate_read_only("SELECT 1 AS \"update\"").is_ok());
        assert!(validate_read_only("SELECT 1 -- drop table\n").is_ok());
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        let a = normalize("SELECT  *\n\tFROM Activities WHERE activity_name = 'Morning  Run' ;");
        let b = normalize("select * from activities where activity_name = 'Morning  Run'");
        assert_eq!(a, b);
        assert!(a.contains("'Morning  Run'"));
        assert_ne!(normalize("SELECT 'A'"), normalize("SELECT 'a'"));
    }

    #[test]
    fn test_normalize_drops_comments() {
        let a = normalize("SELECT heart_rate -- bpm\n    FROM time_series_metrics");
        let b = normalize("SELECT heart_rate -- bpm\nFROM time_series_metrics");
        let c = normalize("select heart_rate /* bpm */ from time_series_metrics;");
        assert_eq!(a, "select heart_rate from time_series_metrics");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(normalize("SELECT '-- kept' AS x"), "select '-- kept' as x");
    }

    #[test]
    fn test_rejects_files_as_tables() {
        for sql in [
            "SELECT * FROM '/tmp/secret.csv'",
            "FROM 'data/*.parquet'",
            "SELECT * FROM splits JOIN 'other.csv' USING (activity_id)",
            "SUMMARIZE '/tmp/secret.csv'",
        ] {
            assert!(
                matches!(validate_read_only(sql), Err(LakeError::InvalidQuery(_))),
                "accepted {:?}",
                sql
            );
        }
        assert!(validate_read_only("SELECT * FROM splits WHERE activity_id = '1'").is_ok());
    }

    #[test]
    fn test_identifiers() {
        assert!(is_identifier("heart_rate"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("hr; drop"));
        assert_eq!(quote_ident("speed_mps").unwrap(), "\"speed_mps\"");
        assert!(quote_ident("a\"b").is_err());
    }
}
