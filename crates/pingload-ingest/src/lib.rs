//! Pingload Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Resumable bulk loader for gzip-compressed geolocation ping files.
//!
//! # Overview
//!
//! - **Ledger**: checkpoint rosters of pending, processed and quarantined
//!   files, and the row-id range each file owns
//! - **Normalization**: typed, sanitized records with venue ids resolved
//! - **Pipeline**: one file at a time, one transaction per file
//! - **Sink**: PostgreSQL `COPY FROM STDIN`, behind the [`sink::BulkSink`] trait
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pingload_ingest::config::IngestConfig;
//! use pingload_ingest::db::{create_pool, DbConfig};
//! use pingload_ingest::ledger::{store::CsvCheckpointStore, FileLedger};
//! use pingload_ingest::pipeline::{IngestionPipeline, PipelineOptions};
//! use pingload_ingest::sink::PgSink;
//! use pingload_ingest::venue::VenueIndex;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env()?;
//!     let ledger = FileLedger::load(CsvCheckpointStore::new(&config.checkpoint_dir), config.gap_policy)?;
//!
//!     let pool = create_pool(&DbConfig::from_env()?).await?;
//!     let venues = VenueIndex::load_from_db(&pool, &config.venue_table).await?;
//!     let sink = PgSink::new(pool, config.copy_target());
//!
//!     let mut pipeline = IngestionPipeline::new(ledger, sink, Arc::new(venues), PipelineOptions::from(&config));
//!     let summary = pipeline.run().await?;
//!     println!("{} rows loaded", summary.rows_loaded);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod header;
pub mod input;
pub mod ledger;
pub mod normalize;
pub mod payload;
pub mod pipeline;
pub mod sink;
pub mod venue;

// Re-export commonly used types
pub use error::{FileError, IngestError, Result};
pub use ledger::{FileLedger, GapPolicy, LedgerError};
pub use pipeline::{IngestionPipeline, RunSummary};
