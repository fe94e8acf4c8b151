//! Pingload Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types and logging setup for the ping ingestion workspace.
//!
//! # Overview
//!
//! - **Types**: checkpoint roster entries and the id aliases used by the
//!   ledger and the pipeline
//! - **Logging**: `tracing` subscriber configuration shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use pingload_common::logging::{init_logging, LogConfig};
//! use pingload_common::types::{FileEntry, FileStatus};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!
//!     let entry = FileEntry::pending(0, "/data/2020/03/part-0000.csv.gz");
//!     assert_eq!(entry.status, FileStatus::Pending);
//!     Ok(())
//! }
//! ```

pub mod logging;
pub mod types;

// Re-export commonly used types
pub use types::{ErrorEntry, FileEntry, FileStatus, RowId, VenueId};
