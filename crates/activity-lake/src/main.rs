use std::path::PathBuf;

use activity_lake::cli::{commands, StorageArgs};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "activity-lake")]
#[command(
    author,
    version,
    about = "Analytical store and bounded query surface for activity telemetry",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "ACTIVITY_LAKE_CONFIG")]
    config: Option<PathBuf>,

    /// Database file path
    #[arg(long, global = true, env = "ACTIVITY_LAKE_DB")]
    db: Option<PathBuf>,

    /// Directory for exchange files
    #[arg(long, global = true, env = "ACTIVITY_LAKE_EXCHANGE")]
    exchange_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and exchange directory
    Init,
    /// Ingest one activity directory
    Ingest {
        /// Activity ID
        activity_id: i64,
        /// Directory holding the activity's JSON documents
        #[arg(long)]
        dir: PathBuf,
    },
    /// Ingest every <activity_id>/ directory under a root
    IngestAll {
        #[arg(long)]
        root: PathBuf,
    },
    /// Compare stored row counts with the raw documents
    Verify {
        activity_id: i64,
        #[arg(long)]
        dir: PathBuf,
    },
    /// Run a read-only query
    Query(commands::QueryArgs),
    /// Statistics over a domain table
    Stats {
        /// Table name
        #[arg(short, long, default_value = "time_series_metrics")]
        table: String,
        #[arg(short, long)]
        activity_id: Option<i64>,
        /// Metric column, repeatable
        #[arg(long = "metric", required = true)]
        metrics: Vec<String>,
        #[arg(long)]
        group_by: Option<String>,
        /// Percentile as a fraction, repeatable
        #[arg(long = "percentile")]
        percentiles: Vec<f64>,
        /// Start (YYYY-MM-DD or YYYY-MM-DD HH:MM:SS)
        #[arg(long)]
        from: Option<String>,
        /// Exclusive end
        #[arg(long)]
        to: Option<String>,
    },
    /// Flag outliers in one activity's time series
    Anomalies {
        #[arg(short, long)]
        activity_id: i64,
        /// Metric column, repeatable
        #[arg(long = "metric", required = true)]
        metrics: Vec<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        window: Option<usize>,
    },
    /// Preview an export handle
    Preview {
        /// Handle fingerprint
        #[arg(long = "handle")]
        fingerprint: String,
    },
    /// Exchange file cache commands
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Delete expired exchange files and their handles
    Purge,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,activity_lake=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let storage = StorageArgs {
        config: cli.config,
        db: cli.db,
        exchange_dir: cli.exchange_dir,
    };

    let result = match cli.command {
        Commands::Init => commands::init(&storage),
        Commands::Ingest { activity_id, dir } => commands::ingest(&storage, activity_id, dir),
        Commands::IngestAll { root } => commands::ingest_all(&storage, root),
        Commands::Verify { activity_id, dir } => commands::verify(&storage, activity_id, dir),
        Commands::Query(args) => commands::query(&storage, args),
        Commands::Stats {
            table,
            activity_id,
            metrics,
            group_by,
            percentiles,
            from,
            to,
        } => commands::stats(
            &storage,
            &table,
            activity_id,
            metrics,
            group_by,
            percentiles,
            from,
            to,
        ),
        Commands::Anomalies {
            activity_id,
            metrics,
            threshold,
            window,
        } => commands::anomalies(&storage, activity_id, metrics, threshold, window),
        Commands::Preview { fingerprint } => commands::preview(&storage, &fingerprint),
        Commands::Cache { command } => match command {
            CacheCommands::Purge => commands::purge_cache(&storage),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
