pub mod cache;
pub mod ingest;
pub mod query;

pub use cache::{preview, purge as purge_cache};
pub use ingest::{ingest, ingest_all, init, verify};
pub use query::{anomalies, query, stats, QueryArgs};
