//! Sliding-window anomaly detection
//!
//! Each point is compared with the mean and standard deviation of its
//! neighbours (the current point excluded). Points whose z-score exceeds the
//! threshold are flagged. Windows are ordered by `seq_no` within an activity.

use duckdb::Connection;
use serde::Serialize;

use crate::config::{DEFAULT_ANOMALY_THRESHOLD, DEFAULT_ANOMALY_WINDOW, DEFAULT_PREVIEW_ROWS};
use crate::error::{LakeError, Result};
use crate::guard::Shrink;

use super::sql::quote_ident;
use super::{to_sql_params, QueryParam};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyOptions {
    /// Neighbours on each side of a point
    pub window: usize,
    /// Absolute z-score above which a point is flagged
    pub threshold: f64,
    /// Maximum flagged points returned per metric
    pub limit: usize,
}

impl Default for AnomalyOptions {
    fn default() -> Self {
        Self {
            window: DEFAULT_ANOMALY_WINDOW,
            threshold: DEFAULT_ANOMALY_THRESHOLD,
            limit: DEFAULT_PREVIEW_ROWS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyPoint {
    pub activity_id: i64,
    pub seq_no: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub value: f64,
    pub local_mean: f64,
    pub local_std: f64,
    pub z_score: f64,
}

/// Flagged points of one metric, strongest first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAnomalies {
    pub metric: String,
    pub total_flagged: u64,
    pub points: Vec<AnomalyPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub window: usize,
    pub threshold: f64,
    pub metrics: Vec<MetricAnomalies>,
}

impl AnomalyReport {
    pub fn metric(&self, name: &str) -> Option<&MetricAnomalies> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

/// Weakest points of the longest list go first, then trailing metrics
impl Shrink for AnomalyReport {
    fn shrink(&mut self) -> Option<String> {
        if let Some(longest) = self
            .metrics
            .iter_mut()
            .filter(|m| !m.points.is_empty())
            .max_by_key(|m| m.points.len())
        {
            longest.points.pop();
            return Some(
                "Flagged points dropped to fit the size limit; raise the threshold".to_string(),
            );
        }
        if self.metrics.len() > 1 {
            self.metrics.pop();
            return Some("Metrics dropped to fit the size limit; request fewer metrics".to_string());
        }
        None
    }
}

/// Flag anomalous points of each metric in `source`
///
/// `source` must expose `activity_id` and `seq_no`; `timestamp` is optional.
pub fn detect(
    conn: &Connection,
    source: &str,
    params: &[QueryParam],
    metrics: &[String],
    options: &AnomalyOptions,
) -> Result<AnomalyReport> {
    if metrics.is_empty() {
        return Err(LakeError::invalid_query("Anomaly detection needs at least one metric"));
    }
    if options.window == 0 {
        return Err(LakeError::invalid_query("Anomaly window must be at least 1"));
    }
    if !(options.threshold.is_finite() && options.threshold > 0.0) {
        return Err(LakeError::invalid_query("Anomaly threshold must be a positive number"));
    }

    let mut results = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let flagged = detect_metric(conn, source, params, metric, options)?;
        tracing::debug!(metric = %metric, flagged = flagged.total_flagged, "Anomaly scan");
        results.push(flagged);
    }

    Ok(AnomalyReport {
        window: options.window,
        threshold: options.threshold,
        metrics: results,
    })
}

fn detect_metric(
    conn: &Connection,
    source: &str,
    params: &[QueryParam],
    metric: &str,
    options: &AnomalyOptions,
) -> Result<MetricAnomalies> {
    let m = quote_ident(metric)?;
    let has_timestamp = source_has_column(conn, source, params, "timestamp")?;
    let timestamp = if has_timestamp {
        "CAST(\"timestamp\" AS VARCHAR)"
    } else {
        "CAST(NULL AS VARCHAR)"
    };

    let sql = format!(
        "WITH points AS (
            SELECT activity_id, seq_no, {timestamp} AS ts, CAST({m} AS DOUBLE) AS value
            FROM ({source}) AS q
            WHERE {m} IS NOT NULL
        ),
        scored AS (
            SELECT activity_id, seq_no, ts, value,
                   AVG(value) OVER w AS local_mean,
                   STDDEV_SAMP(value) OVER w AS local_std
            FROM points
            WINDOW w AS (
                PARTITION BY activity_id ORDER BY seq_no
                ROWS BETWEEN {n} PRECEDING AND {n} FOLLOWING EXCLUDE CURRENT ROW
            )
        ),
        flagged AS (
            SELECT *, (value - local_mean) / local_std AS z_score
            FROM scored
            WHERE local_std > 0 AND ABS(value - local_mean) / local_std > {threshold}
        )
        SELECT activity_id, seq_no, ts, value, local_mean, local_std, z_score,
               COUNT(*) OVER () AS total
        FROM flagged
        ORDER BY ABS(z_score) DESC, activity_id, seq_no
        LIMIT {limit}",
        timestamp = timestamp,
        m = m,
        source = source,
        n = options.window,
        threshold = options.threshold,
        limit = options.limit,
    );

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LakeError::invalid_query(format!("Failed to prepare anomaly scan: {}", e)))?;
    let sql_params = to_sql_params(params);
    let mut rows = stmt
        .query(duckdb::params_from_iter(sql_params.iter()))
        .map_err(|e| LakeError::Database(format!("Failed to scan anomalies: {}", e)))?;

    let mut points = Vec::new();
    let mut total_flagged = 0u64;
    while let Some(row) = rows
        .next()
        .map_err(|e| LakeError::Database(format!("Failed to read anomalies: {}", e)))?
    {
        let point = (|| -> duckdb::Result<(AnomalyPoint, i64)> {
            Ok((
                AnomalyPoint {
                    activity_id: row.get(0)?,
                    seq_no: row.get(1)?,
                    timestamp: row.get(2)?,
                    value: row.get(3)?,
                    local_mean: row.get(4)?,
                    local_std: row.get(5)?,
                    z_score: row.get(6)?,
                },
                row.get(7)?,
            ))
        })()
        .map_err(|e| LakeError::Database(format!("Failed to decode anomaly row: {}", e)))?;

        total_flagged = point.1 as u64;
        points.push(point.0);
    }

    Ok(MetricAnomalies {
        metric: metric.to_string(),
        total_flagged,
        points,
    })
}

fn source_has_column(
    conn: &Connection,
    source: &str,
    params: &[QueryParam],
    column: &str,
) -> Result<bool> {
    let sql = format!("SELECT * FROM ({}) AS q LIMIT 0", source);
    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LakeError::invalid_query(format!("Failed to prepare source: {}", e)))?;
    let sql_params = to_sql_params(params);
    let rows = stmt
        .query(duckdb::params_from_iter(sql_params.iter()))
        .map_err(|e| LakeError::Database(format!("Failed to describe source: {}", e)))?;
    Ok(rows
        .as_ref()
        .map(|s| s.column_names().iter().any(|c| c == column))
        .unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_spike() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ts (
                 activity_id BIGINT, seq_no BIGINT, heart_rate INTEGER, power_w INTEGER
             );
             INSERT INTO ts SELECT 1, i, 150 + (i % 3), 250 FROM range(60) t(i);
             UPDATE ts SET heart_rate = 210 WHERE seq_no = 30;",
        )
        .unwrap();
        conn
    }

    fn metrics(names: &[&str]) -> Vec<String> {
        names.iter().map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_flags_injected_spike() {
        let conn = conn_with_spike();
        let report = detect(
            &conn,
            "SELECT * FROM ts ORDER BY activity_id, seq_no",
            &[],
            &metrics(&["heart_rate"]),
            &AnomalyOptions::default(),
        )
        .unwrap();

        let hr = report.metric("heart_rate").unwrap();
        assert!(hr.total_flagged >= 1);
        assert_eq!(hr.points[0].seq_no, 30);
        assert_eq!(hr.points[0].value, 210.0);
        assert!(hr.points[0].z_score > 2.0);
        assert!(hr.points[0].timestamp.is_none());
    }

    #[test]
    fn test_constant_signal_has_no_anomalies() {
        let conn = conn_with_spike();
        let report = detect(
            &conn,
            "SELECT * FROM ts",
            &[],
            &metrics(&["power_w"]),
            &AnomalyOptions::default(),
        )
        .unwrap();

        let power = report.metric("power_w").unwrap();
        assert_eq!(power.total_flagged, 0);
        assert!(power.points.is_empty());
    }

    #[test]
    fn test_limit_caps_points_but_not_total() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE ts (activity_id BIGINT, seq_no BIGINT, speed DOUBLE);
             INSERT INTO ts
             SELECT 1, i, CASE WHEN i % 20 = 10 THEN 9.0 ELSE 3.0 + (i % 2) * 0.1 END
             FROM range(400) t(i);",
        )
        .unwrap();

        let options = AnomalyOptions {
            limit: 5,
            ..AnomalyOptions::default()
        };
        let report =
            detect(&conn, "SELECT * FROM ts", &[], &metrics(&["speed"]), &options).unwrap();
        let speed = report.metric("speed").unwrap();
        assert_eq!(speed.points.len(), 5);
        assert_eq!(speed.total_flagged, 20);
    }

    #[test]
    fn test_rejects_bad_options() {
        let conn = conn_with_spike();
        let zero_window = AnomalyOptions {
            window: 0,
            ..AnomalyOptions::default()
        };
        let hr = metrics(&["heart_rate"]);
        assert!(detect(&conn, "SELECT * FROM ts", &[], &hr, &zero_window).is_err());
        assert!(detect(&conn, "SELECT * FROM ts", &[], &[], &AnomalyOptions::default()).is_err());
    }
}
