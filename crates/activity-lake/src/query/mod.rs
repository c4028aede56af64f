//! Read-only query surface
//!
//! Every caller-facing result is size bounded. Raw results above the inline
//! row ceiling are refused with a capacity error; large results go through
//! statistics (aggregated in the store) or export (materialized to a Parquet
//! file, returned as a handle plus a short preview).

pub mod anomaly;
pub mod fingerprint;
pub mod metric;
pub mod sql;
pub mod stats;

pub use anomaly::{AnomalyOptions, AnomalyPoint, AnomalyReport, MetricAnomalies};
pub use fingerprint::fingerprint;
pub use metric::{MetricQuery, TimeRange};
pub use stats::{GroupStats, MetricStats, StatisticsResult, StatisticsSpec};

use arrow::record_batch::RecordBatch;
use chrono::NaiveDateTime;
use duckdb::types::Value as SqlValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::{exchange, ExportHandle, HandleCache, Materialized};
use crate::db::Database;
use crate::error::{LakeError, Result};
use crate::guard::{Guarded, OutputGuard, Shrink};

/// A positional query parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl QueryParam {
    /// Timestamps travel as text and are cast in SQL
    pub fn timestamp(value: NaiveDateTime) -> Self {
        Self::Text(value.format("%Y-%m-%d %H:%M:%S%.f").to_string())
    }

    /// Convert a scalar JSON value; arrays and objects are rejected
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::Bool(b) => Ok(Self::Bool(*b)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .ok_or_else(|| {
                    LakeError::invalid_query(format!("Unsupported number parameter: {}", n))
                }),
            Value::String(s) => Ok(Self::Text(s.clone())),
            other => Err(LakeError::invalid_query(format!(
                "Parameters must be scalars, got {}",
                other
            ))),
        }
    }

    /// Parse a command-line parameter: JSON scalars, otherwise plain text
    pub fn parse(raw: &str) -> Self {
        serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| Self::from_json(&v).ok())
            .unwrap_or_else(|| Self::Text(raw.to_string()))
    }

    fn to_sql(&self) -> SqlValue {
        match self {
            Self::Null => SqlValue::Null,
            Self::Bool(b) => SqlValue::Boolean(*b),
            Self::Int(i) => SqlValue::BigInt(*i),
            Self::Float(f) => SqlValue::Double(*f),
            Self::Text(s) => SqlValue::Text(s.clone()),
        }
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

pub(crate) fn to_sql_params(params: &[QueryParam]) -> Vec<SqlValue> {
    params.iter().map(QueryParam::to_sql).collect()
}

/// How a request's result is returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Rows inline, refused above the row ceiling
    #[default]
    Raw,
    /// Aggregates computed in the store
    Statistics,
    /// Materialized to an exchange file
    Export,
    /// Sliding-window outliers
    Anomalies,
}

/// Mode-specific options; unused fields are ignored by other modes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryOptions {
    /// Lower inline row ceiling for raw mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_limit: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub percentiles: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_threshold: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_window: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Vec<QueryParam>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub options: QueryOptions,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, mode: QueryMode) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
            mode,
            options: QueryOptions::default(),
        }
    }

    pub fn with_params(mut self, params: Vec<QueryParam>) -> Self {
        self.params = params;
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Validated statement with the time range applied
    fn source(&self) -> Result<(String, Vec<QueryParam>)> {
        let sql = sql::validate_read_only(&self.sql)?;
        match &self.options.time_range {
            Some(range) => range.wrap(sql, &self.params),
            None => Ok((sql.to_string(), self.params.clone())),
        }
    }
}

/// Rows of a bounded-raw query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawResult {
    pub columns: Vec<String>,
    /// Rows the query produced, before any preview truncation
    pub row_count: u64,
    pub rows: Vec<Map<String, Value>>,
}

/// Rows first, then trailing column names once no row is left
impl Shrink for RawResult {
    fn shrink(&mut self) -> Option<String> {
        if let Some(warning) = self.rows.shrink() {
            return Some(warning);
        }
        if self.columns.len() > 1 {
            self.columns.pop();
            return Some("Column list truncated to fit the size limit".to_string());
        }
        None
    }
}

/// An export handle with the first rows of its file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResult {
    pub handle: ExportHandle,
    pub preview: Vec<Map<String, Value>>,
}

/// Preview rows first, then the handle's column list; the file is never touched
impl Shrink for ExportResult {
    fn shrink(&mut self) -> Option<String> {
        if let Some(warning) = self.preview.shrink() {
            return Some(warning);
        }
        if self.handle.columns.len() > 1 {
            self.handle.columns.pop();
            return Some("Column list truncated; the exchange file has every column".to_string());
        }
        None
    }
}

/// Result of [`QueryEngine::execute`], tagged by mode
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryOutput {
    Raw(RawResult),
    Statistics(StatisticsResult),
    Export(ExportResult),
    Anomalies(AnomalyReport),
}

impl Shrink for QueryOutput {
    fn shrink(&mut self) -> Option<String> {
        match self {
            Self::Raw(r) => r.shrink(),
            Self::Statistics(s) => s.shrink(),
            Self::Export(e) => e.shrink(),
            Self::Anomalies(a) => a.shrink(),
        }
    }
}

/// Runs read-only queries against the store, bounded by an [`OutputGuard`]
pub struct QueryEngine<'a> {
    db: &'a Database,
    cache: &'a HandleCache,
    guard: OutputGuard,
    anomaly: AnomalyOptions,
}

impl<'a> QueryEngine<'a> {
    pub fn new(db: &'a Database, cache: &'a HandleCache, guard: OutputGuard) -> Self {
        Self {
            db,
            cache,
            guard,
            anomaly: AnomalyOptions {
                limit: guard.preview_rows,
                ..AnomalyOptions::default()
            },
        }
    }

    pub fn with_anomaly_defaults(mut self, options: AnomalyOptions) -> Self {
        self.anomaly = options;
        self
    }

    pub fn guard(&self) -> &OutputGuard {
        &self.guard
    }

    /// All rows of a read-only query, refused above the inline row ceiling
    pub fn raw(&self, sql: &str, params: &[QueryParam]) -> Result<RawResult> {
        self.raw_bounded(sql, params, &self.guard)
    }

    fn raw_bounded(
        &self,
        sql: &str,
        params: &[QueryParam],
        guard: &OutputGuard,
    ) -> Result<RawResult> {
        let sql = sql::validate_read_only(sql)?;
        let conn = self.db.reader()?;
        let sql_params = to_sql_params(params);

        let count_sql = format!("SELECT COUNT(*) FROM ({}) AS q", sql);
        let row_count: i64 = conn
            .query_row(&count_sql, duckdb::params_from_iter(sql_params.iter()), |row| row.get(0))
            .map_err(|e| LakeError::invalid_query(format!("Failed to count rows: {}", e)))?;
        let row_count = row_count as u64;

        guard.check_row_ceiling(row_count).inspect_err(|_| {
            tracing::info!(rows = row_count, ceiling = guard.row_ceiling, "Raw query refused")
        })?;

        let (columns, batches) = fetch_batches(&conn, sql, &sql_params)?;
        let rows = exchange::batches_to_rows(&batches)?;
        tracing::debug!(rows = row_count, "Raw query");

        Ok(RawResult {
            columns,
            row_count,
            rows,
        })
    }

    /// Aggregate metrics of a read-only query inside the store
    pub fn statistics(
        &self,
        sql: &str,
        params: &[QueryParam],
        spec: &StatisticsSpec,
    ) -> Result<StatisticsResult> {
        let sql = sql::validate_read_only(sql)?;
        let conn = self.db.reader()?;
        stats::compute(&conn, sql, params, spec)
    }

    /// Materialize a read-only query to an exchange file, reusing a valid handle
    pub fn export(&self, sql: &str, params: &[QueryParam]) -> Result<ExportHandle> {
        let sql = sql::validate_read_only(sql)?;
        let key = fingerprint(sql, params);

        self.cache.get_or_materialize(&key, |temp| {
            let conn = self.db.reader()?;
            let (columns, batches) = fetch_batches(&conn, sql, &to_sql_params(params))
                .map_err(|e| match e {
                    LakeError::Database(msg) => LakeError::export(msg),
                    other => other,
                })?;
            let schema = match batches.first() {
                Some(batch) => batch.schema(),
                None => empty_schema(&conn, sql, params)?,
            };
            let row_count = exchange::write_batches(temp, schema, &batches)?;
            Ok(Materialized { row_count, columns })
        })
    }

    /// Flag outliers per metric; the source must expose `activity_id` and `seq_no`
    pub fn anomalies(
        &self,
        sql: &str,
        params: &[QueryParam],
        metrics: &[String],
        options: Option<AnomalyOptions>,
    ) -> Result<AnomalyReport> {
        let sql = sql::validate_read_only(sql)?;
        let conn = self.db.reader()?;
        anomaly::detect(&conn, sql, params, metrics, &options.unwrap_or(self.anomaly))
    }

    /// Guarded preview of an existing handle
    pub fn preview_handle(&self, fingerprint: &str) -> Result<Guarded<ExportResult>> {
        let handle = self.cache.get(fingerprint)?;
        let preview = self.cache.preview(&handle, self.guard.preview_rows)?;
        Ok(self.guard.fit(Guarded::new(ExportResult { handle, preview })))
    }

    /// Run a request in its mode and fit the result to the output limits
    pub fn execute(&self, request: &QueryRequest) -> Result<Guarded<QueryOutput>> {
        let (sql, params) = request.source()?;
        let options = &request.options;
        tracing::debug!(mode = ?request.mode, "Executing query");

        let guarded = match request.mode {
            QueryMode::Raw => {
                let guard = OutputGuard {
                    row_ceiling: options
                        .row_limit
                        .map_or(self.guard.row_ceiling, |limit| limit.min(self.guard.row_ceiling)),
                    ..self.guard
                };
                let RawResult {
                    columns,
                    row_count,
                    rows,
                } = self.raw_bounded(&sql, &params, &guard)?;
                self.guard
                    .preview(rows)
                    .map(|rows| QueryOutput::Raw(RawResult {
                        columns,
                        row_count,
                        rows,
                    }))
            }
            QueryMode::Statistics => {
                let spec = StatisticsSpec {
                    metrics: options.metrics.clone(),
                    group_by: options.group_by.clone(),
                    percentiles: options.percentiles.clone(),
                };
                Guarded::new(QueryOutput::Statistics(self.statistics(&sql, &params, &spec)?))
            }
            QueryMode::Export => {
                let handle = self.export(&sql, &params)?;
                let preview = self.cache.preview(&handle, self.guard.preview_rows)?;
                Guarded::new(QueryOutput::Export(ExportResult { handle, preview }))
            }
            QueryMode::Anomalies => {
                let anomaly_options = AnomalyOptions {
                    window: options.anomaly_window.unwrap_or(self.anomaly.window),
                    threshold: options.anomaly_threshold.unwrap_or(self.anomaly.threshold),
                    limit: self.anomaly.limit,
                };
                let report =
                    self.anomalies(&sql, &params, &options.metrics, Some(anomaly_options))?;
                Guarded::new(QueryOutput::Anomalies(report))
            }
        };

        Ok(self.guard.fit(guarded))
    }
}

/// Run a query through the Arrow interface; returns its column names and batches
fn fetch_batches(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[SqlValue],
) -> Result<(Vec<String>, Vec<RecordBatch>)> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| LakeError::invalid_query(format!("Failed to prepare query: {}", e)))?;
    let arrow = stmt
        .query_arrow(duckdb::params_from_iter(params.iter()))
        .map_err(|e| LakeError::Database(format!("Failed to run query: {}", e)))?;

    let schema = arrow.get_schema();
    let columns = schema.fields().iter().map(|f| f.name().clone()).collect();
    Ok((columns, arrow.collect()))
}

/// Schema of a query that returned no batches
fn empty_schema(
    conn: &duckdb::Connection,
    sql: &str,
    params: &[QueryParam],
) -> Result<arrow::datatypes::SchemaRef> {
    let mut stmt = conn
        .prepare(&format!("SELECT * FROM ({}) AS q LIMIT 0", sql))
        .map_err(|e| LakeError::export(format!("Failed to prepare query: {}", e)))?;
    let arrow = stmt
        .query_arrow(duckdb::params_from_iter(to_sql_params(params).iter()))
        .map_err(|e| LakeError::export(format!("Failed to run query: {}", e)))?;
    Ok(arrow.get_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        db: Database,
        cache: HandleCache,
    }

    impl Fixture {
        fn new(samples: usize) -> Self {
            let temp = TempDir::new().unwrap();
            let db = Database::open_in_memory().unwrap();
            let cache =
                HandleCache::open(temp.path().join("exchange"), Duration::from_secs(3600))
                    .unwrap();
            db.transaction(|tx| {
                tx.execute_batch(&format!(
                    "INSERT INTO activities (
                         activity_id, activity_date, start_time_local, activity_name
                     )
                     VALUES (1, '2024-12-01', '2024-12-01 07:00:00', 'Morning Run');
                     INSERT INTO time_series_metrics (
                         activity_id, seq_no, timestamp, heart_rate, speed_mps
                     )
                     SELECT 1, i, TIMESTAMP '2024-12-01 07:00:00' + INTERVAL (i) SECOND,
                            140 + (i % 10), 3.0 + (i % 5) * 0.1
                     FROM range({}) t(i);",
                    samples
                ))
                .map_err(|e| LakeError::Database(e.to_string()))
            })
            .unwrap();
            Self {
                _temp: temp,
                db,
                cache,
            }
        }

        fn engine(&self) -> QueryEngine<'_> {
            QueryEngine::new(&self.db, &self.cache, OutputGuard::default())
        }
    }

    #[test]
    fn test_query_param_parsing() {
        assert_eq!(QueryParam::parse("42"), QueryParam::Int(42));
        assert_eq!(QueryParam::parse("2.5"), QueryParam::Float(2.5));
        assert_eq!(QueryParam::parse("null"), QueryParam::Null);
        assert_eq!(QueryParam::parse("Running"), QueryParam::Text("Running".to_string()));
        assert_eq!(QueryParam::parse("\"42\""), QueryParam::Text("42".to_string()));
        assert!(QueryParam::from_json(&serde_json::json!([1])).is_err());
    }

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: QueryRequest =
            serde_json::from_str(r#"{"sql": "SELECT 1", "params": [1, "a", null]}"#).unwrap();
        assert_eq!(request.mode, QueryMode::Raw);
        assert_eq!(
            request.params,
            vec![QueryParam::Int(1), QueryParam::Text("a".to_string()), QueryParam::Null]
        );
    }

    #[test]
    fn test_raw_returns_all_rows_under_ceiling() {
        let fixture = Fixture::new(50);
        let result = fixture
            .engine()
            .raw(
                "SELECT seq_no, heart_rate FROM time_series_metrics
                 WHERE activity_id = ? ORDER BY seq_no",
                &[QueryParam::Int(1)],
            )
            .unwrap();
        assert_eq!(result.row_count, 50);
        assert_eq!(result.rows.len(), 50);
        assert_eq!(result.columns, vec!["seq_no", "heart_rate"]);
        assert_eq!(result.rows[3]["heart_rate"], serde_json::json!(143));
    }

    #[test]
    fn test_raw_above_ceiling_is_capacity_error() {
        let fixture = Fixture::new(200);
        let engine = QueryEngine::new(
            &fixture.db,
            &fixture.cache,
            OutputGuard {
                row_ceiling: 100,
                ..OutputGuard::default()
            },
        );
        let err = engine.raw("SELECT * FROM time_series_metrics", &[]).unwrap_err();
        assert!(matches!(err, LakeError::Capacity { actual: 200, ceiling: 100, .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_rejects_mutations() {
        let fixture = Fixture::new(1);
        let engine = fixture.engine();
        assert!(matches!(
            engine.raw("DELETE FROM activities", &[]),
            Err(LakeError::InvalidQuery(_))
        ));
        assert!(engine.export("DROP TABLE activities", &[]).is_err());
        assert!(fixture.db.has_activity(1).unwrap());
    }

    #[test]
    fn test_execute_raw_previews_and_fits() {
        let fixture = Fixture::new(50);
        let request =
            QueryRequest::new("SELECT * FROM time_series_metrics ORDER BY seq_no", QueryMode::Raw);
        let guarded = fixture.engine().execute(&request).unwrap();

        assert!(guarded.truncated);
        assert!(OutputGuard::json_size(&guarded) <= 1024);
        match &guarded.data {
            QueryOutput::Raw(raw) => {
                assert_eq!(raw.row_count, 50);
                assert!(raw.rows.len() <= 10);
            }
            other => panic!("unexpected output {:?}", other),
        }
    }

    #[test]
    fn test_execute_row_limit_lowers_ceiling() {
        let fixture = Fixture::new(50);
        let request = QueryRequest::new("SELECT * FROM time_series_metrics", QueryMode::Raw)
            .with_options(QueryOptions {
                row_limit: Some(20),
                ..QueryOptions::default()
            });
        let err = fixture.engine().execute(&request).unwrap_err();
        assert!(matches!(err, LakeError::Capacity { actual: 50, ceiling: 20, .. }));
    }

    #[test]
    fn test_execute_time_range() {
        let fixture = Fixture::new(120);
        let at = |s: &str| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
        let request = QueryRequest::new(
            "SELECT seq_no, timestamp FROM time_series_metrics WHERE activity_id = ?",
            QueryMode::Statistics,
        )
        .with_params(vec![QueryParam::Int(1)])
        .with_options(QueryOptions {
            metrics: vec!["seq_no".to_string()],
            time_range: Some(TimeRange::new(
                Some(at("2024-12-01 07:00:30")),
                Some(at("2024-12-01 07:01:00")),
            )),
            ..QueryOptions::default()
        });

        let guarded = fixture.engine().execute(&request).unwrap();
        let QueryOutput::Statistics(stats) = guarded.data else {
            panic!("expected statistics");
        };
        let seq = stats.overall().unwrap().metric("seq_no").unwrap();
        assert_eq!(seq.count, 30);
        assert_eq!(seq.min, Some(30.0));
        assert_eq!(seq.max, Some(59.0));
    }

    #[test]
    fn test_export_reuses_handle_and_previews() {
        let fixture = Fixture::new(500);
        let engine = fixture.engine();
        let sql = "SELECT * FROM time_series_metrics WHERE activity_id = ? ORDER BY seq_no";

        let first = engine.export(sql, &[QueryParam::Int(1)]).unwrap();
        assert_eq!(first.row_count, 500);
        assert!(first.path.exists());
        assert!(first.columns.contains(&"heart_rate".to_string()));

        let respaced = "select *  from time_series_metrics where activity_id = ? order by seq_no;";
        let second = engine.export(respaced, &[QueryParam::Int(1)]).unwrap();
        assert_eq!(first, second);

        let preview = engine.preview_handle(&first.fingerprint).unwrap();
        assert!(preview.data.preview.len() <= 10);
        assert!(OutputGuard::json_size(&preview) <= 1024);
    }

    #[test]
    fn test_export_empty_result() {
        let fixture = Fixture::new(10);
        let handle = fixture
            .engine()
            .export("SELECT * FROM splits WHERE activity_id = ?", &[QueryParam::Int(1)])
            .unwrap();
        assert_eq!(handle.row_count, 0);
        assert!(handle.path.exists());
        assert!(handle.columns.contains(&"split_index".to_string()));
    }

    #[test]
    fn test_execute_anomalies_on_metric_query() {
        let fixture = Fixture::new(60);
        fixture
            .db
            .transaction(|tx| {
                tx.execute_batch(
                    "UPDATE time_series_metrics SET heart_rate = 220 WHERE seq_no = 25",
                )
                .map_err(|e| LakeError::Database(e.to_string()))
            })
            .unwrap();

        let conn = fixture.db.reader().unwrap();
        let (sql, params) =
            MetricQuery::time_series(1).select(["heart_rate"]).build(&conn).unwrap();
        let request = QueryRequest::new(sql, QueryMode::Anomalies)
            .with_params(params)
            .with_options(QueryOptions {
                metrics: vec!["heart_rate".to_string()],
                ..QueryOptions::default()
            });

        let guarded = fixture.engine().execute(&request).unwrap();
        let QueryOutput::Anomalies(report) = guarded.data else {
            panic!("expected anomalies");
        };
        let hr = report.metric("heart_rate").unwrap();
        assert_eq!(hr.points[0].seq_no, 25);
        assert!(hr.points[0].timestamp.is_some());
    }
}
