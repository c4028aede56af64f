//! Aggregate statistics over a query's result
//!
//! The aggregation runs inside the store; only one row per group comes back,
//! so the result size depends on the number of metrics and groups, never on
//! the number of input rows.

use std::collections::BTreeMap;

use duckdb::Connection;
use serde::{Serialize, Serializer};

use crate::error::{LakeError, Result};
use crate::guard::Shrink;

use super::sql::quote_ident;
use super::{to_sql_params, QueryParam};

/// Count, mean, spread and range of one metric
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricStats {
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub percentiles: BTreeMap<String, f64>,
}

/// Statistics for one group (or the whole input when ungrouped)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub rows: u64,
    #[serde(serialize_with = "metrics_as_map")]
    pub metrics: Vec<(String, MetricStats)>,
}

impl GroupStats {
    pub fn metric(&self, name: &str) -> Option<&MetricStats> {
        self.metrics.iter().find(|(m, _)| m == name).map(|(_, s)| s)
    }
}

fn metrics_as_map<S: Serializer>(
    metrics: &[(String, MetricStats)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_map(metrics.iter().map(|(k, v)| (k, v)))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatisticsResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    pub groups: Vec<GroupStats>,
}

impl StatisticsResult {
    /// The ungrouped statistics, or the first group
    pub fn overall(&self) -> Option<&GroupStats> {
        self.groups.first()
    }

    fn any_metric(&self, f: impl Fn(&MetricStats) -> bool) -> bool {
        self.groups
            .iter()
            .flat_map(|g| g.metrics.iter())
            .any(|(_, stats)| f(stats))
    }
}

/// Percentiles first, then standard deviations, then trailing groups, then trailing metrics
impl Shrink for StatisticsResult {
    fn shrink(&mut self) -> Option<String> {
        if self.any_metric(|s| !s.percentiles.is_empty()) {
            for group in &mut self.groups {
                for (_, stats) in &mut group.metrics {
                    stats.percentiles.clear();
                }
            }
            return Some(
                "Percentiles dropped to fit the size limit; request fewer metrics".to_string(),
            );
        }

        if self.any_metric(|s| s.std.is_some()) {
            for group in &mut self.groups {
                for (_, stats) in &mut group.metrics {
                    stats.std = None;
                }
            }
            return Some(
                "Standard deviations dropped to fit the size limit; request fewer metrics"
                    .to_string(),
            );
        }

        if self.groups.len() > 1 {
            self.groups.pop();
            return Some(
                "Groups dropped to fit the size limit; filter the query or use export mode"
                    .to_string(),
            );
        }

        let group = self.groups.first_mut()?;
        if group.metrics.len() > 1 {
            group.metrics.pop();
            return Some("Metrics dropped to fit the size limit; request fewer metrics".to_string());
        }
        None
    }
}

/// What to aggregate
#[derive(Debug, Clone, Default)]
pub struct StatisticsSpec {
    pub metrics: Vec<String>,
    pub group_by: Option<String>,
    /// Fractions in (0, 1), e.g. 0.5 for the median
    pub percentiles: Vec<f64>,
}

fn percentile_key(p: f64) -> String {
    format!("p{}", (p * 1000.0).round() / 10.0)
}

/// Aggregate the metrics of `source` in one query
pub fn compute(
    conn: &Connection,
    source: &str,
    params: &[QueryParam],
    spec: &StatisticsSpec,
) -> Result<StatisticsResult> {
    if spec.metrics.is_empty() {
        return Err(LakeError::invalid_query("Statistics need at least one metric"));
    }
    if let Some(p) = spec.percentiles.iter().find(|p| !(**p > 0.0 && **p < 1.0)) {
        return Err(LakeError::invalid_query(format!(
            "Percentile {} must be between 0 and 1",
            p
        )));
    }

    let mut select = Vec::new();
    let group_expr = spec.group_by.as_deref().map(quote_ident).transpose()?;
    if let Some(g) = &group_expr {
        select.push(format!("CAST({} AS VARCHAR)", g));
    }
    select.push("COUNT(*)".to_string());

    for metric in &spec.metrics {
        let m = quote_ident(metric)?;
        select.push(format!("COUNT({})", m));
        select.push(format!("CAST(AVG({}) AS DOUBLE)", m));
        select.push(format!("CAST(STDDEV_SAMP({}) AS DOUBLE)", m));
        select.push(format!("CAST(MIN({}) AS DOUBLE)", m));
        select.push(format!("CAST(MAX({}) AS DOUBLE)", m));
        for p in &spec.percentiles {
            select.push(format!("CAST(QUANTILE_CONT({}, {}) AS DOUBLE)", m, p));
        }
    }

    let mut sql = format!("SELECT {} FROM ({}) AS q", select.join(", "), source);
    if let Some(g) = &group_expr {
        sql.push_str(&format!(" GROUP BY {g} ORDER BY {g} NULLS LAST", g = g));
    }

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| LakeError::invalid_query(format!("Failed to prepare statistics: {}", e)))?;
    let sql_params = to_sql_params(params);
    let mut rows = stmt
        .query(duckdb::params_from_iter(sql_params.iter()))
        .map_err(|e| LakeError::Database(format!("Failed to compute statistics: {}", e)))?;

    let per_metric = 6 + spec.percentiles.len();
    let offset = usize::from(group_expr.is_some());
    let mut groups = Vec::new();

    while let Some(row) = rows
        .next()
        .map_err(|e| LakeError::Database(format!("Failed to read statistics: {}", e)))?
    {
        let read = |i: usize| -> Result<Option<f64>> {
            row.get::<_, Option<f64>>(i)
                .map_err(|e| LakeError::Database(e.to_string()))
        };

        let group = if group_expr.is_some() {
            Some(
                row.get::<_, Option<String>>(0)
                    .map_err(|e| LakeError::Database(e.to_string()))?
                    .unwrap_or_else(|| "null".to_string()),
            )
        } else {
            None
        };
        let total: i64 = row.get(offset).map_err(|e| LakeError::Database(e.to_string()))?;

        let mut metrics = Vec::with_capacity(spec.metrics.len());
        for (i, metric) in spec.metrics.iter().enumerate() {
            let base = offset + 1 + i * per_metric;
            let count: i64 = row.get(base).map_err(|e| LakeError::Database(e.to_string()))?;
            let mut percentiles = BTreeMap::new();
            for (j, p) in spec.percentiles.iter().enumerate() {
                if let Some(v) = read(base + 5 + j)? {
                    percentiles.insert(percentile_key(*p), v);
                }
            }
            metrics.push((
                metric.clone(),
                MetricStats {
                    count: count as u64,
                    mean: read(base + 1)?,
                    std: read(base + 2)?,
                    min: read(base + 3)?,
                    max: read(base + 4)?,
                    percentiles,
                },
            ));
        }

        groups.push(GroupStats {
            group,
            rows: total as u64,
            metrics,
        });
    }

    Ok(StatisticsResult {
        group_by: spec.group_by.clone(),
        groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{Guarded, OutputGuard};

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE samples (
                 activity_id BIGINT, seq_no BIGINT, heart_rate INTEGER, speed_mps DOUBLE
             );
             INSERT INTO samples SELECT 1, i, 140 + (i % 10), 3.0 FROM range(100) t(i);
             INSERT INTO samples SELECT 2, i, 150, NULL FROM range(10) t(i);",
        )
        .unwrap();
        conn
    }

    fn spec(metrics: &[&str]) -> StatisticsSpec {
        StatisticsSpec {
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_ungrouped_statistics() {
        let conn = conn();
        let result = compute(
            &conn,
            "SELECT * FROM samples WHERE activity_id = ?",
            &[QueryParam::Int(1)],
            &StatisticsSpec {
                percentiles: vec![0.5],
                ..spec(&["heart_rate"])
            },
        )
        .unwrap();

        let overall = result.overall().unwrap();
        assert_eq!(overall.rows, 100);
        let hr = overall.metric("heart_rate").unwrap();
        assert_eq!(hr.count, 100);
        assert_eq!(hr.min, Some(140.0));
        assert_eq!(hr.max, Some(149.0));
        assert_eq!(hr.mean, Some(144.5));
        assert_eq!(hr.percentiles.get("p50"), Some(&144.5));
    }

    #[test]
    fn test_empty_input_has_zero_count() {
        let conn = conn();
        let result = compute(
            &conn,
            "SELECT * FROM samples WHERE activity_id = ?",
            &[QueryParam::Int(99)],
            &spec(&["heart_rate", "speed_mps"]),
        )
        .unwrap();

        let overall = result.overall().unwrap();
        assert_eq!(overall.rows, 0);
        let hr = overall.metric("heart_rate").unwrap();
        assert_eq!(hr.count, 0);
        assert_eq!(hr.mean, None);
        assert_eq!(hr.min, None);
        assert_eq!(hr.max, None);

        let json = serde_json::to_value(&result).unwrap();
        assert!(json["groups"][0]["metrics"]["heart_rate"].get("min").is_none());
    }

    #[test]
    fn test_grouped_statistics() {
        let conn = conn();
        let result = compute(
            &conn,
            "SELECT * FROM samples",
            &[],
            &StatisticsSpec {
                group_by: Some("activity_id".to_string()),
                ..spec(&["speed_mps"])
            },
        )
        .unwrap();

        assert_eq!(result.groups.len(), 2);
        assert_eq!(result.groups[0].group.as_deref(), Some("1"));
        assert_eq!(result.groups[1].metric("speed_mps").unwrap().count, 0);
    }

    #[test]
    fn test_rejects_bad_input() {
        let conn = conn();
        assert!(compute(&conn, "SELECT * FROM samples", &[], &spec(&[])).is_err());
        let injected = spec(&["hr; drop table samples"]);
        assert!(compute(&conn, "SELECT * FROM samples", &[], &injected).is_err());
        let bad_percentile = StatisticsSpec {
            percentiles: vec![1.5],
            ..spec(&["heart_rate"])
        };
        assert!(compute(&conn, "SELECT * FROM samples", &[], &bad_percentile).is_err());
    }

    #[test]
    fn test_shrink_order_fits_json_limit() {
        let conn = conn();
        let result = compute(
            &conn,
            "SELECT * FROM samples",
            &[],
            &StatisticsSpec {
                group_by: Some("seq_no".to_string()),
                percentiles: vec![0.25, 0.5, 0.75, 0.9],
                ..spec(&["heart_rate", "speed_mps", "activity_id"])
            },
        )
        .unwrap();
        assert_eq!(result.groups.len(), 100);

        let guarded = OutputGuard::default().fit(Guarded::new(result));
        assert!(OutputGuard::json_size(&guarded) <= 1024);
        assert!(guarded.warnings[0].starts_with("Percentiles"));
        assert!(guarded.warnings[1].starts_with("Standard deviations"));
        assert!(guarded.data.groups.iter().all(|g| g.metrics.len() == 3));
    }
}
