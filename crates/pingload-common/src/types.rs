//! Common types used across the ingestion workspace

use serde::{Deserialize, Serialize};

/// Globally unique identifier of a row in the destination ping table.
pub type RowId = i64;

/// Identifier of a venue in the destination venue dimension table.
pub type VenueId = i32;

/// Processing status of an input file.
///
/// Serialized as `0` / `1` so checkpoint files stay readable by the
/// spreadsheet-style tooling that produced the first rosters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FileStatus {
    /// Registered but not yet loaded
    #[default]
    Pending,
    /// Loaded and committed to the destination
    Processed,
}

impl From<FileStatus> for u8 {
    fn from(status: FileStatus) -> Self {
        match status {
            FileStatus::Pending => 0,
            FileStatus::Processed => 1,
        }
    }
}

impl TryFrom<u8> for FileStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FileStatus::Pending),
            1 => Ok(FileStatus::Processed),
            other => Err(format!("invalid file status: {}", other)),
        }
    }
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::Pending => write!(f, "pending"),
            FileStatus::Processed => write!(f, "processed"),
        }
    }
}

/// An input file on the active roster.
///
/// Ordering by `sequence_index` is the processing order and the row-id
/// allocation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Position of the file in the processing order
    #[serde(rename = "index")]
    pub sequence_index: u64,

    /// Location of the compressed input file
    pub path: String,

    /// Whether the file has been committed to the destination
    pub status: FileStatus,

    /// Number of rows written for this file (0 while pending)
    pub row_count: u64,
}

impl FileEntry {
    /// Creates a pending entry with no rows written.
    pub fn pending(sequence_index: u64, path: impl Into<String>) -> Self {
        Self {
            sequence_index,
            path: path.into(),
            status: FileStatus::Pending,
            row_count: 0,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.status == FileStatus::Processed
    }
}

/// A file that failed to load and was moved off the active roster.
///
/// Error entries are never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "index")]
    pub sequence_index: u64,
    pub path: String,
    pub status: FileStatus,
}

impl From<&FileEntry> for ErrorEntry {
    fn from(entry: &FileEntry) -> Self {
        Self {
            sequence_index: entry.sequence_index,
            path: entry.path.clone(),
            status: entry.status,
        }
    }
}
