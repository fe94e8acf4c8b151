//! Durable checkpoint storage for the file ledger
//!
//! The checkpoint is two tables: the active roster (`index,path,status,row_count`)
//! and the error roster (`index,path,status`). [`CsvCheckpointStore`] keeps
//! them as CSV files in one directory and rewrites each file in full on every
//! save through a temp file and a rename.

use std::fs::File;
use std::path::{Path, PathBuf};

use pingload_common::{ErrorEntry, FileEntry};
use serde::Serialize;
use tracing::debug;

use super::LedgerError;

/// Active roster file name
pub const ACTIVE_FILE: &str = "files_to_process.csv";

/// Error roster file name
pub const ERRORS_FILE: &str = "file_errors.csv";

const ACTIVE_HEADER: [&str; 4] = ["index", "path", "status", "row_count"];
const ERRORS_HEADER: [&str; 3] = ["index", "path", "status"];

/// Both rosters as they sit in durable storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointState {
    pub active: Vec<FileEntry>,
    pub errors: Vec<ErrorEntry>,
}

/// Durable home of the ledger's rosters.
///
/// Single writer: the pipeline that owns the ledger is the only caller of
/// [`CheckpointStore::save`].
pub trait CheckpointStore: Send {
    /// Returns `None` when no checkpoint has ever been written.
    fn load(&self) -> Result<Option<CheckpointState>, LedgerError>;

    /// Replaces the stored rosters with `state`.
    fn save(&self, state: &CheckpointState) -> Result<(), LedgerError>;

    /// Human-readable location, for diagnostics.
    fn location(&self) -> String;
}

/// CSV files in a checkpoint directory.
#[derive(Debug, Clone)]
pub struct CsvCheckpointStore {
    dir: PathBuf,
}

impl CsvCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn active_path(&self) -> PathBuf {
        self.dir.join(ACTIVE_FILE)
    }

    pub fn errors_path(&self) -> PathBuf {
        self.dir.join(ERRORS_FILE)
    }

    fn read_roster<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>, LedgerError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn write_roster<T: Serialize>(
        &self,
        path: &Path,
        header: &[&str],
        rows: &[T],
    ) -> Result<(), LedgerError> {
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let mut writer = csv::WriterBuilder::new()
                .has_headers(false)
                .from_writer(tmp.as_file());
            writer.write_record(header)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LedgerError::Io(e.error))?;
        sync_dir(&self.dir)?;
        debug!(path = %path.display(), rows = rows.len(), "Checkpoint roster rewritten");
        Ok(())
    }
}

impl CheckpointStore for CsvCheckpointStore {
    fn load(&self) -> Result<Option<CheckpointState>, LedgerError> {
        let active_path = self.active_path();
        if !active_path.exists() {
            return Ok(None);
        }

        let active = Self::read_roster(&active_path)?;
        let errors_path = self.errors_path();
        let errors = if errors_path.exists() {
            Self::read_roster(&errors_path)?
        } else {
            Vec::new()
        };

        Ok(Some(CheckpointState { active, errors }))
    }

    fn save(&self, state: &CheckpointState) -> Result<(), LedgerError> {
        std::fs::create_dir_all(&self.dir)?;
        // Error roster first: a crash between the two renames leaves the
        // quarantined entry on both rosters, which load resolves as quarantined.
        self.write_roster(&self.errors_path(), &ERRORS_HEADER, &state.errors)?;
        self.write_roster(&self.active_path(), &ACTIVE_HEADER, &state.active)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}
