//! Database schema creation
//!
//! `ensure_schema` only ever issues `CREATE ... IF NOT EXISTS`. It never drops or
//! alters a table, so adding a column to an existing table needs an
//! out-of-band migration.

use duckdb::Connection;

use crate::db::models::TIME_SERIES_COLUMNS;
use crate::error::{LakeError, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Every table holding analytical data
pub const DATA_TABLES: &[&str] = &[
    "activities",
    "splits",
    "form_efficiency",
    "heart_rate_zones",
    "hr_efficiency",
    "performance_trends",
    "vo2max",
    "lactate_threshold",
    "time_series_metrics",
    "body_composition",
];

/// Create all tables if absent. Safe to call on every start.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let time_series = time_series_ddl();

    let statements: Vec<&str> = vec![
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        // Root entity; every child references it
        "CREATE TABLE IF NOT EXISTS activities (
            activity_id BIGINT PRIMARY KEY,
            activity_date DATE NOT NULL,
            activity_name TEXT,
            activity_type TEXT,
            start_time_local TIMESTAMP NOT NULL,
            duration_sec DOUBLE,
            distance_m DOUBLE,
            avg_hr INTEGER,
            max_hr INTEGER,
            avg_speed_mps DOUBLE,
            avg_pace_sec_per_km DOUBLE,
            elevation_gain_m DOUBLE,
            elevation_loss_m DOUBLE,
            calories INTEGER,
            training_effect DOUBLE,
            ingested_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE IF NOT EXISTS splits (
            activity_id BIGINT NOT NULL REFERENCES activities(activity_id),
            split_index INTEGER NOT NULL,
            distance_m DOUBLE NOT NULL,
            duration_sec DOUBLE NOT NULL,
            pace_sec_per_km DOUBLE,
            avg_hr INTEGER,
            max_hr INTEGER,
            avg_cadence DOUBLE,
            avg_power DOUBLE,
            ground_contact_time_ms DOUBLE,
            vertical_oscillation_cm DOUBLE,
            vertical_ratio_pct DOUBLE,
            elevation_gain_m DOUBLE,
            elevation_loss_m DOUBLE,
            terrain TEXT,
            PRIMARY KEY (activity_id, split_index)
        )",
        "CREATE TABLE IF NOT EXISTS form_efficiency (
            activity_id BIGINT PRIMARY KEY REFERENCES activities(activity_id),
            gct_average DOUBLE,
            gct_min DOUBLE,
            gct_max DOUBLE,
            gct_std DOUBLE,
            gct_rating TEXT,
            vo_average DOUBLE,
            vo_min DOUBLE,
            vo_max DOUBLE,
            vo_std DOUBLE,
            vo_rating TEXT,
            vr_average DOUBLE,
            vr_min DOUBLE,
            vr_max DOUBLE,
            vr_std DOUBLE,
            vr_rating TEXT
        )",
        "CREATE TABLE IF NOT EXISTS heart_rate_zones (
            activity_id BIGINT NOT NULL REFERENCES activities(activity_id),
            zone_number INTEGER NOT NULL,
            low_boundary_bpm INTEGER,
            high_boundary_bpm INTEGER,
            time_in_zone_sec DOUBLE NOT NULL,
            zone_percentage DOUBLE,
            PRIMARY KEY (activity_id, zone_number)
        )",
        "CREATE TABLE IF NOT EXISTS hr_efficiency (
            activity_id BIGINT PRIMARY KEY REFERENCES activities(activity_id),
            primary_zone TEXT NOT NULL,
            zone_distribution_rating TEXT,
            hr_stability TEXT,
            aerobic_efficiency TEXT,
            training_quality TEXT,
            zone1_pct DOUBLE,
            zone2_pct DOUBLE,
            zone3_pct DOUBLE,
            zone4_pct DOUBLE,
            zone5_pct DOUBLE
        )",
        "CREATE TABLE IF NOT EXISTS performance_trends (
            activity_id BIGINT PRIMARY KEY REFERENCES activities(activity_id),
            pace_consistency DOUBLE NOT NULL,
            hr_drift_pct DOUBLE,
            cadence_consistency TEXT,
            fatigue_pattern TEXT,
            warmup_avg_pace_sec_per_km DOUBLE,
            warmup_avg_hr DOUBLE,
            main_avg_pace_sec_per_km DOUBLE,
            main_avg_hr DOUBLE,
            finish_avg_pace_sec_per_km DOUBLE,
            finish_avg_hr DOUBLE
        )",
        "CREATE TABLE IF NOT EXISTS vo2max (
            activity_id BIGINT PRIMARY KEY REFERENCES activities(activity_id),
            vo2max_value DOUBLE NOT NULL,
            vo2max_precise DOUBLE,
            calendar_date DATE,
            fitness_age INTEGER
        )",
        "CREATE TABLE IF NOT EXISTS lactate_threshold (
            activity_id BIGINT PRIMARY KEY REFERENCES activities(activity_id),
            heart_rate_bpm INTEGER,
            speed_mps DOUBLE,
            pace_sec_per_km DOUBLE,
            ftp_watts INTEGER,
            power_to_weight DOUBLE,
            weight_kg DOUBLE,
            calendar_date DATE
        )",
        time_series.as_str(),
        // Daily snapshot, not owned by any activity
        "CREATE TABLE IF NOT EXISTS body_composition (
            date DATE PRIMARY KEY,
            weight_kg DOUBLE,
            bmi DOUBLE,
            body_fat_pct DOUBLE,
            body_water_pct DOUBLE,
            bone_mass_kg DOUBLE,
            muscle_mass_kg DOUBLE
        )",
        "INSERT INTO schema_version (version) VALUES (1) ON CONFLICT DO NOTHING",
    ];

    for sql in statements {
        conn.execute_batch(sql).map_err(|e| {
            LakeError::Schema(format!(
                "{}: {}",
                sql.split_whitespace().take(6).collect::<Vec<_>>().join(" "),
                e
            ))
        })?;
    }

    tracing::debug!(version = SCHEMA_VERSION, "Schema ensured");
    Ok(())
}

/// DDL for the time-series table, rendered from the metric column table
fn time_series_ddl() -> String {
    let metric_columns: Vec<String> = TIME_SERIES_COLUMNS
        .iter()
        .map(|c| format!("            {} {},", c.column, c.kind.sql_type()))
        .collect();

    format!(
        "CREATE TABLE IF NOT EXISTS time_series_metrics (
            activity_id BIGINT NOT NULL REFERENCES activities(activity_id),
            seq_no BIGINT NOT NULL,
            timestamp TIMESTAMP,
{}
            PRIMARY KEY (activity_id, seq_no)
        )",
        metric_columns.join("\n")
    )
}

/// Column names of a table, in table order
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(
            "SELECT column_name FROM information_schema.columns
             WHERE table_schema = 'main' AND table_name = ?
             ORDER BY ordinal_position",
        )
        .map_err(|e| LakeError::Database(e.to_string()))?;

    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))
        .map_err(|e| LakeError::Database(e.to_string()))?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LakeError::Database(e.to_string()))?;

    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        conn.prepare("SELECT table_name FROM information_schema.tables WHERE table_schema = 'main'")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect()
    }

    #[test]
    fn test_ensure_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).expect("Schema creation failed");

        let tables = table_names(&conn);
        for table in DATA_TABLES {
            assert!(tables.contains(&table.to_string()), "missing table {}", table);
        }
        assert!(tables.contains(&"schema_version".to_string()));
    }

    #[test]
    fn test_ensure_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).expect("First call failed");
        ensure_schema(&conn).expect("Second call should be idempotent");

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_time_series_columns_match_table() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let columns = table_columns(&conn, "time_series_metrics").unwrap();
        assert_eq!(&columns[..3], &["activity_id", "seq_no", "timestamp"]);
        assert_eq!(columns.len(), 3 + TIME_SERIES_COLUMNS.len());
    }

    #[test]
    fn test_existing_table_is_not_altered() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE body_composition (date DATE PRIMARY KEY)")
            .unwrap();
        ensure_schema(&conn).unwrap();

        let columns = table_columns(&conn, "body_composition").unwrap();
        assert_eq!(columns, vec!["date".to_string()]);
    }

    #[test]
    fn test_child_requires_parent() {
        let conn = Connection::open_in_memory().unwrap();
        ensure_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO vo2max (activity_id, vo2max_value) VALUES (999, 50.0)",
            [],
        );
        assert!(result.is_err());
    }
}
