//! Builder for source queries over the domain tables
//!
//! Table and column names are checked against the live schema before they are
//! interpolated; values always travel as parameters.

use chrono::NaiveDateTime;
use duckdb::Connection;
use serde::{Deserialize, Serialize};

use crate::db::schema::{self, DATA_TABLES};
use crate::error::{LakeError, Result};

use super::sql::quote_ident;
use super::QueryParam;

/// Half-open time interval `[start, end)`; either side may be open
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Column to filter on; defaults to the table's time column
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDateTime>,
}

impl TimeRange {
    pub fn new(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self {
            column: None,
            start,
            end,
        }
    }

    /// `WHERE` conditions over `column` plus their parameters
    pub(crate) fn conditions(&self, column: &str) -> Result<(Vec<String>, Vec<QueryParam>)> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start >= end {
                return Err(LakeError::invalid_query(format!(
                    "Time range start {} is not before end {}",
                    start, end
                )));
            }
        }

        let column = quote_ident(column)?;
        let mut conditions = Vec::new();
        let mut params = Vec::new();
        if let Some(start) = self.start {
            conditions.push(format!("{} >= CAST(? AS TIMESTAMP)", column));
            params.push(QueryParam::timestamp(start));
        }
        if let Some(end) = self.end {
            conditions.push(format!("{} < CAST(? AS TIMESTAMP)", column));
            params.push(QueryParam::timestamp(end));
        }
        Ok((conditions, params))
    }

    /// Filter an arbitrary read-only query by time
    pub(crate) fn wrap(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> Result<(String, Vec<QueryParam>)> {
        let column = self.column.as_deref().unwrap_or("timestamp");
        let (conditions, extra) = self.conditions(column)?;
        if conditions.is_empty() {
            return Ok((sql.to_string(), params.to_vec()));
        }
        let mut all = params.to_vec();
        all.extend(extra);
        Ok((
            format!("SELECT * FROM ({}) AS q WHERE {}", sql, conditions.join(" AND ")),
            all,
        ))
    }
}

/// Time column used for range filters on a table
fn time_column(table: &str) -> Option<&'static str> {
    match table {
        "time_series_metrics" => Some("timestamp"),
        "activities" => Some("start_time_local"),
        "body_composition" => Some("date"),
        "vo2max" | "lactate_threshold" => Some("calendar_date"),
        _ => None,
    }
}

/// Key columns, in the order rows are returned
fn key_columns(table: &str) -> &'static [&'static str] {
    match table {
        "time_series_metrics" => &["activity_id", "seq_no"],
        "splits" => &["activity_id", "split_index"],
        "heart_rate_zones" => &["activity_id", "zone_number"],
        "body_composition" => &["date"],
        _ => &["activity_id"],
    }
}

/// Source query over one domain table
#[derive(Debug, Clone, PartialEq)]
pub struct MetricQuery {
    table: String,
    activity_id: Option<i64>,
    range: Option<TimeRange>,
    columns: Vec<String>,
}

impl MetricQuery {
    pub fn new(table: &str) -> Result<Self> {
        if !DATA_TABLES.contains(&table) {
            return Err(LakeError::invalid_query(format!(
                "Unknown table {}; expected one of {}",
                table,
                DATA_TABLES.join(", ")
            )));
        }
        Ok(Self {
            table: table.to_string(),
            activity_id: None,
            range: None,
            columns: Vec::new(),
        })
    }

    /// Time-series samples of one activity
    pub fn time_series(activity_id: i64) -> Self {
        Self {
            table: "time_series_metrics".to_string(),
            activity_id: Some(activity_id),
            range: None,
            columns: Vec::new(),
        }
    }

    pub fn for_activity(mut self, activity_id: i64) -> Self {
        self.activity_id = Some(activity_id);
        self
    }

    pub fn between(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    /// Restrict the selected columns; key columns are always included
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Render the SQL and its parameters, validating names against the schema
    pub fn build(&self, conn: &Connection) -> Result<(String, Vec<QueryParam>)> {
        let known = schema::table_columns(conn, &self.table)?;
        let check = |column: &str| -> Result<()> {
            if known.iter().any(|k| k == column) {
                Ok(())
            } else {
                Err(LakeError::invalid_query(format!(
                    "Unknown column {} in {}",
                    column, self.table
                )))
            }
        };

        let keys = key_columns(&self.table);
        let select = if self.columns.is_empty() {
            "*".to_string()
        } else {
            let mut selected: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            if let Some(time) = time_column(&self.table) {
                selected.push(time.to_string());
            }
            for column in &self.columns {
                check(column)?;
                if !selected.contains(column) {
                    selected.push(column.clone());
                }
            }
            selected
                .iter()
                .map(|c| quote_ident(c))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };

        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(activity_id) = self.activity_id {
            check("activity_id")?;
            conditions.push("activity_id = ?".to_string());
            params.push(QueryParam::Int(activity_id));
        }

        if let Some(range) = &self.range {
            let column = match range.column.as_deref() {
                Some(column) => column,
                None => time_column(&self.table).ok_or_else(|| {
                    LakeError::invalid_query(format!("{} has no time column", self.table))
                })?,
            };
            check(column)?;
            let (range_conditions, range_params) = range.conditions(column)?;
            conditions.extend(range_conditions);
            params.extend(range_params);
        }

        let mut sql = format!("SELECT {} FROM {}", select, self.table);
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&keys.join(", "));

        Ok((sql, params))
    }
}
