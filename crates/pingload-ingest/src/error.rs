//! Error types for the ingestion pipeline
//!
//! Errors are layered by how far they propagate:
//!
//! - [`RecordError`](crate::normalize::RecordError): one input row, skipped and counted
//! - [`FileError`]: one input file, which is quarantined
//! - [`IngestError`]: the whole run, which stops

use std::io;

use thiserror::Error;

use crate::header::HeaderMismatch;
use crate::ledger::LedgerError;
use crate::sink::SinkError;

/// Failure that ends the processing of one input file.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("Header of {path} does not match the input contract: {source}")]
    HeaderMismatch {
        path: String,
        #[source]
        source: HeaderMismatch,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{path} has no loadable records ({skipped} skipped)")]
    EmptyFile { path: String, skipped: u64 },

    #[error("Sink rejected {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: SinkError,
    },
}

impl FileError {
    /// Whether the failure should be quarantined and the run continued.
    pub fn is_quarantinable(&self) -> bool {
        !matches!(self, FileError::HeaderMismatch { .. })
    }
}

/// Failure that stops the run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Input format error in {path}: {source}")]
    HeaderMismatch {
        path: String,
        #[source]
        source: HeaderMismatch,
    },

    #[error("Background transform task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// True when no checkpoint exists to resume from.
    pub fn is_ledger_missing(&self) -> bool {
        matches!(self, IngestError::Ledger(LedgerError::LedgerMissing { .. }))
    }

    /// True when row-id history has a hole the ledger cannot allocate across.
    pub fn is_allocation_gap(&self) -> bool {
        matches!(self, IngestError::Ledger(LedgerError::AllocationGap { .. }))
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;
