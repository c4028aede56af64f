//! Query commands

use std::path::PathBuf;

use clap::Args;

use crate::cli::{parse_time, print_json, StorageArgs};
use crate::error::Result;
use crate::guard::Guarded;
use crate::query::{
    AnomalyOptions, MetricQuery, QueryMode, QueryOptions, QueryParam, QueryRequest, StatisticsSpec,
    TimeRange,
};

/// Options shared by `query`
#[derive(Debug, Clone, Args)]
pub struct QueryArgs {
    /// Read-only SQL statement
    #[arg(long, required_unless_present = "request")]
    pub sql: Option<String>,

    /// JSON request file ({"sql", "params", "mode", "options"})
    #[arg(long, conflicts_with = "sql")]
    pub request: Option<PathBuf>,

    /// Positional parameter (JSON scalar or plain text), repeatable
    #[arg(short, long = "param")]
    pub params: Vec<String>,

    #[arg(short, long, value_enum, default_value = "raw")]
    pub mode: QueryMode,

    /// Metric column for statistics and anomalies, repeatable
    #[arg(long = "metric")]
    pub metrics: Vec<String>,

    #[arg(long)]
    pub group_by: Option<String>,

    /// Percentile as a fraction, repeatable
    #[arg(long = "percentile")]
    pub percentiles: Vec<f64>,

    /// Lower the inline row ceiling for raw mode
    #[arg(long)]
    pub row_limit: Option<u64>,

    /// Inclusive start (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
    #[arg(long)]
    pub from: Option<String>,

    /// Exclusive end
    #[arg(long)]
    pub to: Option<String>,

    /// Column the time range applies to
    #[arg(long, default_value = "timestamp")]
    pub time_column: String,

    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long)]
    pub window: Option<usize>,
}

fn time_range(from: Option<&str>, to: Option<&str>) -> Result<Option<TimeRange>> {
    if from.is_none() && to.is_none() {
        return Ok(None);
    }
    Ok(Some(TimeRange::new(
        from.map(parse_time).transpose()?,
        to.map(parse_time).transpose()?,
    )))
}

impl QueryArgs {
    fn into_request(self) -> Result<QueryRequest> {
        if let Some(path) = &self.request {
            let json = std::fs::read_to_string(path)?;
            return Ok(serde_json::from_str(&json)?);
        }

        let time_range =
            time_range(self.from.as_deref(), self.to.as_deref())?.map(|range| TimeRange {
                column: Some(self.time_column.clone()),
                ..range
            });

        Ok(QueryRequest {
            sql: self.sql.unwrap_or_default(),
            params: self.params.iter().map(|p| QueryParam::parse(p)).collect(),
            mode: self.mode,
            options: QueryOptions {
                row_limit: self.row_limit,
                metrics: self.metrics,
                group_by: self.group_by,
                percentiles: self.percentiles,
                time_range,
                anomaly_threshold: self.threshold,
                anomaly_window: self.window,
            },
        })
    }
}

/// Run a read-only query in the requested mode
pub fn query(storage: &StorageArgs, args: QueryArgs) -> Result<()> {
    let lake = storage.open()?;
    let request = args.into_request()?;
    print_json(&lake.query().execute(&request)?)
}

/// Statistics over one domain table
#[allow(clippy::too_many_arguments)]
pub fn stats(
    storage: &StorageArgs,
    table: &str,
    activity_id: Option<i64>,
    metrics: Vec<String>,
    group_by: Option<String>,
    percentiles: Vec<f64>,
    from: Option<String>,
    to: Option<String>,
) -> Result<()> {
    let lake = storage.open()?;

    let mut source = MetricQuery::new(table)?;
    if let Some(id) = activity_id {
        source = source.for_activity(id);
    }
    if let Some(range) = time_range(from.as_deref(), to.as_deref())? {
        source = source.between(range);
    }
    let (sql, params) = source.build(&lake.db().reader()?)?;

    let engine = lake.query();
    let result = engine.statistics(
        &sql,
        &params,
        &StatisticsSpec {
            metrics,
            group_by,
            percentiles,
        },
    )?;
    print_json(&engine.guard().fit(Guarded::new(result)))
}

/// Anomalies in one activity's time series
pub fn anomalies(
    storage: &StorageArgs,
    activity_id: i64,
    metrics: Vec<String>,
    threshold: Option<f64>,
    window: Option<usize>,
) -> Result<()> {
    let lake = storage.open()?;
    let config = lake.config();
    let (sql, params) = MetricQuery::time_series(activity_id)
        .select(metrics.iter().cloned())
        .build(&lake.db().reader()?)?;

    let options = AnomalyOptions {
        window: window.unwrap_or(config.anomaly_window),
        threshold: threshold.unwrap_or(config.anomaly_threshold),
        limit: config.preview_rows,
    };
    let engine = lake.query();
    let report = engine.anomalies(&sql, &params, &metrics, Some(options))?;
    print_json(&engine.guard().fit(Guarded::new(report)))
}
