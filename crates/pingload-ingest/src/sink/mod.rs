//! Bulk-load destination
//!
//! A sink accepts one file's [`BulkPayload`] inside a transaction that the
//! pipeline commits or rolls back explicitly. Nothing a sink receives is
//! visible to other readers until [`BulkSink::commit`] returns.

pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::payload::BulkPayload;

pub use postgres::PgSink;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bulk load rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait BulkSink: Send {
    /// Stream `payload` into an open transaction, starting one if needed.
    /// Returns the number of rows the destination accepted.
    async fn bulk_copy(&mut self, payload: &BulkPayload) -> Result<u64, SinkError>;

    /// Commit the open transaction.
    async fn commit(&mut self) -> Result<(), SinkError>;

    /// Discard the open transaction, if any.
    async fn rollback(&mut self) -> Result<(), SinkError>;

    /// Rows already committed for the file with `source_index`.
    async fn committed_rows(&mut self, source_index: u64) -> Result<u64, SinkError>;
}
