//! Shared fixtures for pipeline integration tests
//!
//! - [`MemorySink`]: in-memory [`BulkSink`] with per-file failure injection
//! - gzip input builders for well-formed and broken ping files
//! - ledger setup over a temp checkpoint directory

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use pingload_common::FileEntry;
use pingload_ingest::header::Column;
use pingload_ingest::ledger::store::{CheckpointState, CheckpointStore, CsvCheckpointStore};
use pingload_ingest::ledger::{FileLedger, GapPolicy};
use pingload_ingest::payload::BulkPayload;
use pingload_ingest::sink::{BulkSink, SinkError};

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,pingload_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// In-memory sink
// ============================================================================

/// Records committed payloads and fails on demand.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub committed: Vec<BulkPayload>,
    staged: Vec<BulkPayload>,
    pub rollbacks: usize,
    /// Source indexes whose COPY fails
    pub fail_copy: HashSet<u64>,
    /// Source indexes whose commit fails
    pub fail_commit: HashSet<u64>,
    /// Rows reported as already committed, by source index
    pub preexisting: HashMap<u64, u64>,
    pub fail_row_count_query: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_commit(indexes: &[u64]) -> Self {
        Self {
            fail_commit: indexes.iter().copied().collect(),
            ..Self::default()
        }
    }

    pub fn committed_for(&self, source_index: u64) -> Option<&BulkPayload> {
        self.committed.iter().find(|p| p.source_index == source_index)
    }

    /// Every committed line, in commit order.
    pub fn lines(&self) -> Vec<String> {
        self.committed
            .iter()
            .flat_map(|p| {
                String::from_utf8_lossy(&p.data)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// Row ids of every committed line, in commit order.
    pub fn row_ids(&self) -> Vec<i64> {
        self.lines()
            .iter()
            .map(|line| line.split('\t').next().unwrap_or_default().parse().unwrap_or(-1))
            .collect()
    }
}

#[async_trait]
impl BulkSink for MemorySink {
    async fn bulk_copy(&mut self, payload: &BulkPayload) -> Result<u64, SinkError> {
        if self.fail_copy.contains(&payload.source_index) {
            return Err(SinkError::Rejected(format!(
                "injected COPY failure for file {}",
                payload.source_index
            )));
        }
        self.staged.push(payload.clone());
        Ok(payload.rows)
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        if let Some(payload) = self
            .staged
            .iter()
            .find(|p| self.fail_commit.contains(&p.source_index))
        {
            return Err(SinkError::Rejected(format!(
                "injected commit failure for file {}",
                payload.source_index
            )));
        }
        self.committed.append(&mut self.staged);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.staged.clear();
        self.rollbacks += 1;
        Ok(())
    }

    async fn committed_rows(&mut self, source_index: u64) -> Result<u64, SinkError> {
        if self.fail_row_count_query {
            return Err(SinkError::Rejected("injected row count failure".to_string()));
        }
        if let Some(rows) = self.preexisting.get(&source_index) {
            return Ok(*rows);
        }
        Ok(self
            .committed
            .iter()
            .filter(|p| p.source_index == source_index)
            .map(|p| p.rows)
            .sum())
    }
}

// ============================================================================
// Input fixtures
// ============================================================================

pub fn header_line() -> String {
    Column::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(",")
}

/// One input row with the given values and every other column empty.
pub fn ping_row(values: &[(Column, &str)]) -> String {
    let mut fields = vec![String::new(); Column::ALL.len()];
    for (column, value) in values {
        if let Some(pos) = Column::ALL.iter().position(|c| c == column) {
            fields[pos] = value.to_string();
        }
    }
    fields.join(",")
}

/// A well-formed row for `device` at `location_at`.
pub fn valid_row(device: &str, location_at: i64) -> String {
    let observed = location_at.to_string();
    ping_row(&[
        (Column::AdvertiserId, device),
        (Column::LocationAt, observed.as_str()),
        (Column::Latitude, "40.7128"),
        (Column::Longitude, "-74.0060"),
    ])
}

/// Gzip `header` plus `rows` into `dir/name`.
pub fn write_input(dir: &Path, name: &str, header: &str, rows: &[String]) -> PathBuf {
    let mut body = String::new();
    body.push_str(header);
    body.push('\n');
    for row in rows {
        body.push_str(row);
        body.push('\n');
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(body.as_bytes()).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, encoder.finish().unwrap()).unwrap();
    path
}

/// A gzip file with a valid header and `n` valid rows.
pub fn write_valid_input(dir: &Path, name: &str, n: usize) -> PathBuf {
    let rows: Vec<String> = (0..n)
        .map(|i| valid_row(&format!("dev-{}", i), 1_600_000_000 + i as i64))
        .collect();
    write_input(dir, name, &header_line(), &rows)
}

// ============================================================================
// Ledger setup
// ============================================================================

/// Write a checkpoint listing `paths` as pending, in order, and load it.
pub fn ledger_for(checkpoint_dir: &Path, paths: &[PathBuf], policy: GapPolicy) -> FileLedger {
    let active = paths
        .iter()
        .enumerate()
        .map(|(i, p)| FileEntry::pending(i as u64, p.to_string_lossy()))
        .collect();
    let store = CsvCheckpointStore::new(checkpoint_dir);
    store
        .save(&CheckpointState {
            active,
            errors: Vec::new(),
        })
        .unwrap();
    FileLedger::load(store, policy).unwrap()
}

/// Reload the checkpoint from disk.
pub fn reload(checkpoint_dir: &Path, policy: GapPolicy) -> FileLedger {
    FileLedger::load(CsvCheckpointStore::new(checkpoint_dir), policy).unwrap()
}
