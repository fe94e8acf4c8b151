//! File-processing ledger
//!
//! Tracks which input files have been loaded, the row-id range each one
//! owns, and which files were quarantined after a failed load. The ledger is
//! the only thing that makes a run resumable: after every committed or
//! quarantined file the pipeline calls [`FileLedger::persist`], and the next
//! run picks up from the first pending entry.
//!
//! # Rosters
//!
//! - **active**: every registered file that has not failed, ordered by
//!   sequence index, each PENDING or PROCESSED
//! - **errors**: append-only list of quarantined files, never retried
//!
//! # Row-id allocation
//!
//! A file's start id is 1 plus the sum of the row counts of every active entry
//! before it, and all of those entries must already be PROCESSED. What
//! happens when a quarantined file sits between them depends on the
//! [`GapPolicy`].

pub mod rowid;
pub mod store;

use std::path::Path;

use pingload_common::{ErrorEntry, FileEntry, FileStatus, RowId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use rowid::{RowIdAllocator, RowRange};
use store::{CheckpointState, CheckpointStore, CsvCheckpointStore};

/// Ledger errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No checkpoint state found at {location}; initialize the ledger first")]
    LedgerMissing { location: String },

    #[error("Checkpoint state already exists at {location}")]
    AlreadyInitialized { location: String },

    #[error("Cannot allocate row ids for file {index}: file {blocking_index} has no committed row range")]
    AllocationGap { index: u64, blocking_index: u64 },

    #[error("File {index} already processed with {recorded} rows, refusing to record {requested}")]
    InconsistentUpdate {
        index: u64,
        recorded: u64,
        requested: u64,
    },

    #[error("File {index} already committed rows from {first_row_id}, refusing to quarantine it")]
    AlreadyProcessed { index: u64, first_row_id: RowId },

    #[error("File {0} is not on the active roster")]
    UnknownEntry(u64),

    #[error("Corrupt checkpoint state: {0}")]
    Corrupt(String),

    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint format error: {0}")]
    Csv(#[from] csv::Error),
}

/// What row-id allocation does about quarantined files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Quarantined files contribute zero rows; numbering continues with the
    /// next active file.
    #[default]
    SkipErrored,
    /// Any quarantined file or missing sequence index before the file being
    /// allocated is an [`LedgerError::AllocationGap`] until repaired by hand.
    Strict,
}

impl std::str::FromStr for GapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "skip_errored" | "skip" => Ok(GapPolicy::SkipErrored),
            "strict" => Ok(GapPolicy::Strict),
            other => Err(format!(
                "Invalid gap policy: {}. Must be 'skip_errored' or 'strict'",
                other
            )),
        }
    }
}

/// Counts for a status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub pending: usize,
    pub processed: usize,
    pub errored: usize,
    pub rows_committed: u64,
    /// Start id the next pending file would receive, if allocation is possible
    pub next_row_id: Option<RowId>,
}

/// The file-processing ledger.
pub struct FileLedger<S: CheckpointStore = CsvCheckpointStore> {
    store: S,
    policy: GapPolicy,
    active: Vec<FileEntry>,
    errors: Vec<ErrorEntry>,
}

impl<S: CheckpointStore> FileLedger<S> {
    /// Load the rosters from `store`.
    ///
    /// A missing checkpoint is [`LedgerError::LedgerMissing`]; the ledger is
    /// never created implicitly.
    pub fn load(store: S, policy: GapPolicy) -> Result<Self, LedgerError> {
        let state = store.load()?.ok_or_else(|| LedgerError::LedgerMissing {
            location: store.location(),
        })?;

        let ledger = Self::from_state(store, policy, state)?;
        info!(
            active = ledger.active.len(),
            errored = ledger.errors.len(),
            policy = ?policy,
            "Ledger loaded"
        );
        Ok(ledger)
    }

    /// Write an empty checkpoint to `store` and return the ledger over it.
    pub fn create(store: S, policy: GapPolicy) -> Result<Self, LedgerError> {
        if store.load()?.is_some() {
            return Err(LedgerError::AlreadyInitialized {
                location: store.location(),
            });
        }
        let ledger = Self {
            store,
            policy,
            active: Vec::new(),
            errors: Vec::new(),
        };
        ledger.persist()?;
        Ok(ledger)
    }

    fn from_state(store: S, policy: GapPolicy, state: CheckpointState) -> Result<Self, LedgerError> {
        let CheckpointState {
            mut active,
            errors,
        } = state;

        // An entry on both rosters was quarantined right before a crash.
        active.retain(|entry| {
            let quarantined = errors
                .iter()
                .any(|e| e.sequence_index == entry.sequence_index);
            if quarantined {
                warn!(
                    index = entry.sequence_index,
                    path = %entry.path,
                    "Entry found on both rosters, keeping it quarantined"
                );
            }
            !quarantined
        });

        active.sort_by_key(|entry| entry.sequence_index);
        if let Some(pair) = active
            .windows(2)
            .find(|pair| pair[0].sequence_index == pair[1].sequence_index)
        {
            return Err(LedgerError::Corrupt(format!(
                "duplicate sequence index {} on the active roster",
                pair[0].sequence_index
            )));
        }

        Ok(Self {
            store,
            policy,
            active,
            errors,
        })
    }

    pub fn policy(&self) -> GapPolicy {
        self.policy
    }

    /// Active roster in sequence order.
    pub fn entries(&self) -> &[FileEntry] {
        &self.active
    }

    /// Error roster in quarantine order.
    pub fn errors(&self) -> &[ErrorEntry] {
        &self.errors
    }

    pub fn get(&self, sequence_index: u64) -> Option<&FileEntry> {
        self.position(sequence_index).map(|i| &self.active[i])
    }

    fn position(&self, sequence_index: u64) -> Option<usize> {
        self.active
            .binary_search_by_key(&sequence_index, |entry| entry.sequence_index)
            .ok()
    }

    /// PENDING entries in ascending sequence order.
    ///
    /// Each call starts from the current roster, so the sequence can be
    /// re-read after mutations.
    pub fn unprocessed(&self) -> impl Iterator<Item = &FileEntry> + '_ {
        self.active
            .iter()
            .filter(|entry| entry.status == FileStatus::Pending)
    }

    /// Starting row id for `entry`.
    ///
    /// Every active entry before it must be PROCESSED; under
    /// [`GapPolicy::Strict`] no quarantined or missing index may precede it
    /// either.
    pub fn allocate_row_range(&self, entry: &FileEntry) -> Result<RowId, LedgerError> {
        let position = self
            .position(entry.sequence_index)
            .ok_or(LedgerError::UnknownEntry(entry.sequence_index))?;

        if self.policy == GapPolicy::Strict {
            self.check_contiguous(entry.sequence_index, position)?;
        }

        if let Some(blocking) = self.active[..position].iter().find(|e| !e.is_processed()) {
            return Err(LedgerError::AllocationGap {
                index: entry.sequence_index,
                blocking_index: blocking.sequence_index,
            });
        }

        let start = self.start_of(position);
        debug!(index = entry.sequence_index, start, "Row range allocated");
        Ok(start)
    }

    fn start_of(&self, position: usize) -> RowId {
        let mut prior: Option<RowRange> = None;
        for previous in &self.active[..position] {
            let start = RowIdAllocator::start_after(prior.as_ref());
            prior = Some(RowRange::new(start, previous.row_count));
        }
        RowIdAllocator::start_after(prior.as_ref())
    }

    fn check_contiguous(&self, index: u64, position: usize) -> Result<(), LedgerError> {
        if let Some(errored) = self
            .errors
            .iter()
            .filter(|e| e.sequence_index < index)
            .min_by_key(|e| e.sequence_index)
        {
            return Err(LedgerError::AllocationGap {
                index,
                blocking_index: errored.sequence_index,
            });
        }

        for (expected, previous) in self.active[..=position].iter().enumerate() {
            let expected = expected as u64;
            if previous.sequence_index != expected {
                return Err(LedgerError::AllocationGap {
                    index,
                    blocking_index: expected,
                });
            }
        }

        Ok(())
    }

    /// Record a successful load.
    ///
    /// Repeating the call with the same count is a no-op; a different count
    /// for an already processed file is [`LedgerError::InconsistentUpdate`].
    pub fn mark_processed(&mut self, entry: &FileEntry, row_count: u64) -> Result<(), LedgerError> {
        let position = self
            .position(entry.sequence_index)
            .ok_or(LedgerError::UnknownEntry(entry.sequence_index))?;
        let current = &mut self.active[position];

        match current.status {
            FileStatus::Processed if current.row_count == row_count => Ok(()),
            FileStatus::Processed => Err(LedgerError::InconsistentUpdate {
                index: current.sequence_index,
                recorded: current.row_count,
                requested: row_count,
            }),
            FileStatus::Pending => {
                current.status = FileStatus::Processed;
                current.row_count = row_count;
                Ok(())
            },
        }
    }

    /// Move `entry` to the error roster. It never appears in
    /// [`FileLedger::unprocessed`] again.
    ///
    /// A processed file owns committed row ids and cannot be quarantined.
    pub fn mark_errored(&mut self, entry: &FileEntry) -> Result<(), LedgerError> {
        match self.position(entry.sequence_index) {
            Some(position) if self.active[position].is_processed() => {
                Err(LedgerError::AlreadyProcessed {
                    index: entry.sequence_index,
                    first_row_id: self.start_of(position),
                })
            },
            Some(position) => {
                let removed = self.active.remove(position);
                warn!(
                    index = removed.sequence_index,
                    path = %removed.path,
                    "File quarantined to error roster"
                );
                self.errors.push(ErrorEntry::from(&removed));
                Ok(())
            },
            None if self
                .errors
                .iter()
                .any(|e| e.sequence_index == entry.sequence_index) =>
            {
                Ok(())
            },
            None => Err(LedgerError::UnknownEntry(entry.sequence_index)),
        }
    }

    /// Append a PENDING entry for `path` with the next sequence index.
    ///
    /// Returns `None` when the path is already on either roster.
    pub fn register(&mut self, path: impl AsRef<Path>) -> Option<FileEntry> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let known = self.active.iter().any(|e| e.path == path)
            || self.errors.iter().any(|e| e.path == path);
        if known {
            return None;
        }

        let next_index = self
            .active
            .iter()
            .map(|e| e.sequence_index)
            .chain(self.errors.iter().map(|e| e.sequence_index))
            .max()
            .map_or(0, |max| max + 1);

        let entry = FileEntry::pending(next_index, path);
        self.active.push(entry.clone());
        Some(entry)
    }

    /// Rewrite both rosters to durable storage.
    pub fn persist(&self) -> Result<(), LedgerError> {
        self.store.save(&CheckpointState {
            active: self.active.clone(),
            errors: self.errors.clone(),
        })
    }

    pub fn summary(&self) -> LedgerSummary {
        let processed: Vec<&FileEntry> = self.active.iter().filter(|e| e.is_processed()).collect();
        let next_row_id = match self.unprocessed().next() {
            Some(entry) => self.allocate_row_range(entry).ok(),
            None => Some(RowIdAllocator::start_after(
                RowIdAllocator::replay(processed.iter().map(|e| e.row_count)).as_ref(),
            )),
        };

        LedgerSummary {
            pending: self.active.len() - processed.len(),
            processed: processed.len(),
            errored: self.errors.len(),
            rows_committed: processed.iter().map(|e| e.row_count).sum(),
            next_row_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn processed(index: u64, rows: u64) -> FileEntry {
        FileEntry {
            sequence_index: index,
            path: format!("f{}.gz", index),
            status: FileStatus::Processed,
            row_count: rows,
        }
    }

    fn ledger(active: Vec<FileEntry>, errors: Vec<ErrorEntry>, policy: GapPolicy) -> (tempfile::TempDir, FileLedger) {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvCheckpointStore::new(dir.path());
        store.save(&CheckpointState { active, errors }).unwrap();
        let ledger = FileLedger::load(store, policy).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_load_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = FileLedger::load(CsvCheckpointStore::new(dir.path()), GapPolicy::default());
        assert!(matches!(result, Err(LedgerError::LedgerMissing { .. })));
    }

    #[test]
    fn test_first_entry_starts_at_one() {
        let (_dir, ledger) = ledger(vec![FileEntry::pending(0, "a.gz")], vec![], GapPolicy::default());
        let entry = ledger.get(0).unwrap().clone();
        assert_eq!(ledger.allocate_row_range(&entry).unwrap(), 1);
    }

    #[test]
    fn test_allocation_after_processed_entry() {
        let (_dir, ledger) = ledger(
            vec![processed(0, 3), FileEntry::pending(1, "b.gz")],
            vec![],
            GapPolicy::default(),
        );
        let entry = ledger.get(1).unwrap().clone();
        assert_eq!(ledger.allocate_row_range(&entry).unwrap(), 4);
    }

    #[test]
    fn test_allocation_requires_processed_predecessor() {
        let (_dir, ledger) = ledger(
            vec![FileEntry::pending(0, "a.gz"), FileEntry::pending(1, "b.gz")],
            vec![],
            GapPolicy::default(),
        );
        let entry = ledger.get(1).unwrap().clone();
        assert!(matches!(
            ledger.allocate_row_range(&entry),
            Err(LedgerError::AllocationGap {
                index: 1,
                blocking_index: 0
            })
        ));
    }

    #[test]
    fn test_skip_errored_policy_ignores_quarantined_file() {
        let errored = ErrorEntry {
            sequence_index: 1,
            path: "b.gz".to_string(),
            status: FileStatus::Pending,
        };
        let (_dir, ledger) = ledger(
            vec![processed(0, 3), FileEntry::pending(2, "c.gz")],
            vec![errored],
            GapPolicy::SkipErrored,
        );
        let entry = ledger.get(2).unwrap().clone();
        assert_eq!(ledger.allocate_row_range(&entry).unwrap(), 4);
    }

    #[test]
    fn test_strict_policy_blocks_on_quarantined_file() {
        let errored = ErrorEntry {
            sequence_index: 1,
            path: "b.gz".to_string(),
            status: FileStatus::Pending,
        };
        let (_dir, ledger) = ledger(
            vec![processed(0, 3), FileEntry::pending(2, "c.gz")],
            vec![errored],
            GapPolicy::Strict,
        );
        let entry = ledger.get(2).unwrap().clone();
        assert!(matches!(
            ledger.allocate_row_range(&entry),
            Err(LedgerError::AllocationGap {
                index: 2,
                blocking_index: 1
            })
        ));
    }

    #[test]
    fn test_strict_policy_blocks_on_missing_index() {
        let (_dir, ledger) = ledger(
            vec![processed(0, 3), FileEntry::pending(5, "f.gz")],
            vec![],
            GapPolicy::Strict,
        );
        let entry = ledger.get(5).unwrap().clone();
        assert!(matches!(
            ledger.allocate_row_range(&entry),
            Err(LedgerError::AllocationGap { index: 5, blocking_index: 1 })
        ));
    }

    #[test]
    fn test_mark_processed_is_idempotent() {
        let (_dir, mut ledger) = ledger(vec![FileEntry::pending(0, "a.gz")], vec![], GapPolicy::default());
        let entry = ledger.get(0).unwrap().clone();

        ledger.mark_processed(&entry, 3).unwrap();
        let after_first = ledger.entries().to_vec();
        ledger.mark_processed(&entry, 3).unwrap();
        assert_eq!(ledger.entries(), after_first.as_slice());

        assert!(matches!(
            ledger.mark_processed(&entry, 4),
            Err(LedgerError::InconsistentUpdate {
                index: 0,
                recorded: 3,
                requested: 4
            })
        ));
    }

    #[test]
    fn test_mark_errored_excludes_from_unprocessed() {
        let (_dir, mut ledger) = ledger(
            vec![FileEntry::pending(0, "a.gz"), FileEntry::pending(1, "b.gz")],
            vec![],
            GapPolicy::default(),
        );
        let entry = ledger.get(0).unwrap().clone();
        ledger.mark_errored(&entry).unwrap();

        let pending: Vec<u64> = ledger.unprocessed().map(|e| e.sequence_index).collect();
        assert_eq!(pending, vec![1]);
        assert_eq!(ledger.errors().len(), 1);
        assert_eq!(ledger.errors()[0].path, "a.gz");

        // Quarantining twice is harmless, unknown entries are not
        ledger.mark_errored(&entry).unwrap();
        assert!(matches!(
            ledger.mark_errored(&FileEntry::pending(9, "z.gz")),
            Err(LedgerError::UnknownEntry(9))
        ));
    }

    #[test]
    fn test_processed_entry_cannot_be_quarantined() {
        let (_dir, mut ledger) = ledger(
            vec![processed(0, 3), processed(1, 2), FileEntry::pending(2, "c.gz")],
            vec![],
            GapPolicy::default(),
        );
        let first = ledger.get(0).unwrap().clone();
        let second = ledger.get(1).unwrap().clone();
        assert!(matches!(
            ledger.mark_errored(&first),
            Err(LedgerError::AlreadyProcessed {
                index: 0,
                first_row_id: 1
            })
        ));
        assert!(matches!(
            ledger.mark_errored(&second),
            Err(LedgerError::AlreadyProcessed {
                index: 1,
                first_row_id: 4
            })
        ));

        // Committed ids stay reserved
        assert!(ledger.errors().is_empty());
        let next = ledger.get(2).unwrap().clone();
        assert_eq!(ledger.allocate_row_range(&next).unwrap(), 6);
    }

    #[test]
    fn test_entry_on_both_rosters_loads_as_quarantined() {
        let errored = ErrorEntry {
            sequence_index: 0,
            path: "a.gz".to_string(),
            status: FileStatus::Pending,
        };
        let (_dir, ledger) = ledger(
            vec![FileEntry::pending(0, "a.gz"), FileEntry::pending(1, "b.gz")],
            vec![errored],
            GapPolicy::default(),
        );
        assert_eq!(ledger.entries().len(), 1);
        assert_eq!(ledger.entries()[0].sequence_index, 1);
    }

    #[test]
    fn test_duplicate_index_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = CsvCheckpointStore::new(dir.path());
        store
            .save(&CheckpointState {
                active: vec![FileEntry::pending(0, "a.gz"), FileEntry::pending(0, "b.gz")],
                errors: vec![],
            })
            .unwrap();
        assert!(matches!(
            FileLedger::load(store, GapPolicy::default()),
            Err(LedgerError::Corrupt(_))
        ));
    }

    #[test]
    fn test_register_assigns_next_index_and_skips_known_paths() {
        let errored = ErrorEntry {
            sequence_index: 4,
            path: "old.gz".to_string(),
            status: FileStatus::Pending,
        };
        let (_dir, mut ledger) = ledger(vec![processed(0, 1)], vec![errored], GapPolicy::default());

        let entry = ledger.register("new.gz").unwrap();
        assert_eq!(entry.sequence_index, 5);
        assert!(ledger.register("new.gz").is_none());
        assert!(ledger.register("old.gz").is_none());
        assert!(ledger.register("f0.gz").is_none());
    }

    #[test]
    fn test_create_refuses_existing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        FileLedger::create(CsvCheckpointStore::new(dir.path()), GapPolicy::default()).unwrap();
        assert!(matches!(
            FileLedger::create(CsvCheckpointStore::new(dir.path()), GapPolicy::default()),
            Err(LedgerError::AlreadyInitialized { .. })
        ));
        let ledger = FileLedger::load(CsvCheckpointStore::new(dir.path()), GapPolicy::default()).unwrap();
        assert!(ledger.entries().is_empty());
    }

    #[test]
    fn test_summary() {
        let (_dir, ledger) = ledger(
            vec![processed(0, 3), processed(1, 2), FileEntry::pending(2, "c.gz")],
            vec![],
            GapPolicy::default(),
        );
        let summary = ledger.summary();
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.errored, 0);
        assert_eq!(summary.rows_committed, 5);
        assert_eq!(summary.next_row_id, Some(6));
    }

    #[test]
    fn test_gap_policy_from_str() {
        assert_eq!("strict".parse::<GapPolicy>().unwrap(), GapPolicy::Strict);
        assert_eq!("skip-errored".parse::<GapPolicy>().unwrap(), GapPolicy::SkipErrored);
        assert!("lenient".parse::<GapPolicy>().is_err());
    }
}
