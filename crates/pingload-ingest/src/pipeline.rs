//! Ingestion pipeline
//!
//! Drives the ledger's pending files through the sink one at a time, in
//! sequence order. Each file moves through
//!
//! ```text
//! Opened -> RowRangeAllocated -> Transformed -> Committed
//!    \              \                  \
//!     +--------------+------------------+--> Failed
//! ```
//!
//! and always ends with a persisted ledger update: PROCESSED on commit,
//! quarantined to the error roster on failure. Two conditions stop the run
//! instead: a header that breaks the input contract, and a row-id allocation
//! gap. Neither touches the ledger.
//!
//! Cancellation and the file limit are only checked between files.

use std::path::PathBuf;
use std::sync::Arc;

use pingload_common::{FileEntry, RowId};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::IngestConfig;
use crate::error::{FileError, IngestError, Result};
use crate::input::{open_input, InputFile};
use crate::ledger::store::{CheckpointStore, CsvCheckpointStore};
use crate::ledger::FileLedger;
use crate::normalize::{DataQualityWarning, RecordError, RecordNormalizer, SkipCounts};
use crate::payload::{BulkPayload, PayloadEncoder, TimestampMode};
use crate::sink::BulkSink;
use crate::venue::VenueIndex;

/// Skipped records logged individually per file before switching to a count.
const SKIP_LOG_SAMPLE: u64 = 5;

/// Unmapped venue names logged individually per file.
const VENUE_LOG_SAMPLE: u64 = 5;

/// Where a file was when processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStage {
    Opened,
    RowRangeAllocated,
    Transformed,
    Committed,
    Failed,
}

impl std::fmt::Display for FileStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FileStage::Opened => "opened",
            FileStage::RowRangeAllocated => "row_range_allocated",
            FileStage::Transformed => "transformed",
            FileStage::Committed => "committed",
            FileStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How one file ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FileOutcome {
    Committed {
        first_row_id: RowId,
        rows: u64,
        skipped: SkipCounts,
        unmapped_venues: u64,
    },
    /// Rows were already in the destination; the ledger was repaired.
    Reconciled { rows: u64 },
    Quarantined {
        /// Last stage the file reached before failing
        last_stage: FileStage,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileReport {
    pub index: u64,
    pub path: String,
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// No pending files remain
    Exhausted,
    /// The file limit was reached
    Limit,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub files_committed: usize,
    pub files_quarantined: usize,
    pub files_reconciled: usize,
    pub rows_loaded: u64,
    pub skipped: SkipCounts,
    pub unmapped_venues: u64,
    pub stop_reason: StopReason,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            files_committed: 0,
            files_quarantined: 0,
            files_reconciled: 0,
            rows_loaded: 0,
            skipped: SkipCounts::default(),
            unmapped_venues: 0,
            stop_reason: StopReason::Exhausted,
            files: Vec::new(),
        }
    }

    fn record(&mut self, report: FileReport) {
        match &report.outcome {
            FileOutcome::Committed {
                rows,
                skipped,
                unmapped_venues,
                ..
            } => {
                self.files_committed += 1;
                self.rows_loaded += rows;
                self.skipped += *skipped;
                self.unmapped_venues += unmapped_venues;
            },
            FileOutcome::Reconciled { .. } => self.files_reconciled += 1,
            FileOutcome::Quarantined { .. } => self.files_quarantined += 1,
        }
        self.files.push(report);
    }
}

/// Pipeline settings that do not belong to a collaborator.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub timestamp_mode: TimestampMode,
    pub null_token: String,
    pub max_files: Option<usize>,
    pub reconcile_with_destination: bool,
}

impl From<&IngestConfig> for PipelineOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            timestamp_mode: config.timestamp_mode,
            null_token: config.null_token.clone(),
            max_files: config.max_files,
            reconcile_with_destination: config.reconcile_with_destination,
        }
    }
}

/// A file's accepted records, encoded, plus what was dropped on the way.
#[derive(Debug)]
pub struct Transformed {
    pub payload: BulkPayload,
    pub skipped: SkipCounts,
    pub unmapped_venues: u64,
}

/// Normalize every remaining row of `input` into `encoder`.
///
/// Record-level problems are counted and never escape. A read failure part
/// way through, or a file with nothing accepted, is a [`FileError`].
pub fn transform_rows(
    path: &str,
    mut input: InputFile,
    normalizer: &RecordNormalizer,
    mut encoder: PayloadEncoder,
) -> std::result::Result<Transformed, FileError> {
    let mut skipped = SkipCounts::default();
    let mut unmapped_venues = 0u64;
    let mut row = csv::StringRecord::new();
    let mut line: u64 = 1;

    loop {
        line += 1;
        let normalized = match input.reader.read_record(&mut row) {
            Ok(false) => break,
            Ok(true) => normalizer.normalize(&row, &input.header),
            Err(e) if e.is_io_error() => {
                return Err(FileError::Read {
                    path: path.to_string(),
                    source: std::io::Error::from(e),
                });
            },
            Err(e) => Err(RecordError::Unreadable(e.to_string())),
        };

        match normalized {
            Ok(normalized) => {
                if let Some(DataQualityWarning::UnmappedVenue(name)) = &normalized.warning {
                    unmapped_venues += 1;
                    if unmapped_venues <= VENUE_LOG_SAMPLE {
                        warn!(line, venue = %name, "Venue not found in venue table");
                    }
                }
                encoder.push(&normalized.record);
            },
            Err(e) => {
                skipped.record(e.kind());
                if skipped.total() <= SKIP_LOG_SAMPLE {
                    warn!(line, error = %e, "Skipping record");
                } else {
                    debug!(line, error = %e, "Skipping record");
                }
            },
        }
    }

    if skipped.total() > SKIP_LOG_SAMPLE {
        warn!(
            skipped = skipped.total(),
            "... and {} more skipped records",
            skipped.total() - SKIP_LOG_SAMPLE
        );
    }
    if unmapped_venues > VENUE_LOG_SAMPLE {
        warn!(
            unmapped_venues,
            "... and {} more unmapped venue names",
            unmapped_venues - VENUE_LOG_SAMPLE
        );
    }

    if encoder.rows() == 0 {
        return Err(FileError::EmptyFile {
            path: path.to_string(),
            skipped: skipped.total(),
        });
    }

    Ok(Transformed {
        payload: encoder.finish(),
        skipped,
        unmapped_venues,
    })
}

/// Sequential per-file loader.
pub struct IngestionPipeline<K: BulkSink, S: CheckpointStore = CsvCheckpointStore> {
    ledger: FileLedger<S>,
    sink: K,
    normalizer: RecordNormalizer,
    options: PipelineOptions,
    cancel: CancellationToken,
}

impl<K: BulkSink, S: CheckpointStore> IngestionPipeline<K, S> {
    pub fn new(ledger: FileLedger<S>, sink: K, venues: Arc<VenueIndex>, options: PipelineOptions) -> Self {
        Self {
            ledger,
            sink,
            normalizer: RecordNormalizer::new(venues),
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next file boundary once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn ledger(&self) -> &FileLedger<S> {
        &self.ledger
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    pub fn into_parts(self) -> (FileLedger<S>, K) {
        (self.ledger, self.sink)
    }

    /// Process pending files until none remain, the file limit is reached,
    /// or the run is cancelled.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::new();
        info!(
            pending = self.ledger.unprocessed().count(),
            max_files = ?self.options.max_files,
            "Starting ingestion run"
        );

        summary.stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self
                .options
                .max_files
                .is_some_and(|max| summary.files_committed >= max)
            {
                break StopReason::Limit;
            }
            let Some(entry) = self.ledger.unprocessed().next().cloned() else {
                break StopReason::Exhausted;
            };

            let span = info_span!("file", index = entry.sequence_index, path = %entry.path);
            let outcome = self.process_file(&entry).instrument(span).await?;
            summary.record(FileReport {
                index: entry.sequence_index,
                path: entry.path,
                outcome,
            });
        };

        info!(
            committed = summary.files_committed,
            quarantined = summary.files_quarantined,
            reconciled = summary.files_reconciled,
            rows = summary.rows_loaded,
            skipped = summary.skipped.total(),
            unmapped_venues = summary.unmapped_venues,
            stop_reason = ?summary.stop_reason,
            "Ingestion run finished"
        );
        Ok(summary)
    }

    /// Take one pending file to COMMITTED or FAILED.
    ///
    /// Returns `Err` only for run-fatal conditions, after which the ledger is
    /// unchanged for this file.
    pub async fn process_file(&mut self, entry: &FileEntry) -> Result<FileOutcome> {
        if self.options.reconcile_with_destination {
            match self.sink.committed_rows(entry.sequence_index).await {
                Ok(0) => {},
                Ok(rows) => {
                    warn!(rows, "File already present in destination, repairing ledger");
                    self.ledger.mark_processed(entry, rows)?;
                    self.ledger.persist()?;
                    return Ok(FileOutcome::Reconciled { rows });
                },
                Err(source) => {
                    let err = FileError::Sink {
                        path: entry.path.clone(),
                        source,
                    };
                    return self.quarantine(entry, FileStage::Opened, err);
                },
            }
        }

        let path = PathBuf::from(&entry.path);
        let opened = tokio::task::spawn_blocking(move || open_input(&path)).await?;
        let input = match opened {
            Ok(input) => input,
            Err(FileError::HeaderMismatch { path, source }) => {
                error!(error = %source, "Input header does not match, aborting run");
                return Err(IngestError::HeaderMismatch { path, source });
            },
            Err(err) => return self.quarantine(entry, FileStage::Opened, err),
        };

        let start = self.ledger.allocate_row_range(entry)?;
        debug!(start, stage = %FileStage::RowRangeAllocated, "Row range allocated");

        let normalizer = self.normalizer.clone();
        let encoder = PayloadEncoder::new(
            self.options.timestamp_mode,
            self.options.null_token.clone(),
            entry.sequence_index,
            start,
        );
        let path = entry.path.clone();
        let transformed = tokio::task::spawn_blocking(move || transform_rows(&path, input, &normalizer, encoder)).await?;
        let transformed = match transformed {
            Ok(transformed) => transformed,
            Err(err) => return self.quarantine(entry, FileStage::RowRangeAllocated, err),
        };

        let payload = &transformed.payload;
        info!(
            rows = payload.rows,
            skipped = transformed.skipped.total(),
            first_row_id = payload.first_row_id,
            last_row_id = payload.row_range().end(),
            stage = %FileStage::Transformed,
            "File transformed"
        );

        if let Err(source) = self.load(payload).await {
            let err = FileError::Sink {
                path: entry.path.clone(),
                source,
            };
            return self.quarantine(entry, FileStage::Transformed, err);
        }

        self.ledger.mark_processed(entry, payload.rows)?;
        self.ledger.persist()?;
        info!(rows = payload.rows, stage = %FileStage::Committed, "File committed");

        Ok(FileOutcome::Committed {
            first_row_id: payload.first_row_id,
            rows: payload.rows,
            skipped: transformed.skipped,
            unmapped_venues: transformed.unmapped_venues,
        })
    }

    /// Copy and commit as one unit, rolling back on any failure.
    async fn load(&mut self, payload: &BulkPayload) -> std::result::Result<(), crate::sink::SinkError> {
        let result = match self.sink.bulk_copy(payload).await {
            Ok(_) => self.sink.commit().await,
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(rollback_err) = self.sink.rollback().await {
                warn!(error = %rollback_err, "Rollback after failed load also failed");
            }
        }
        result
    }

    fn quarantine(&mut self, entry: &FileEntry, last_stage: FileStage, err: FileError) -> Result<FileOutcome> {
        error!(
            error = %err,
            last_stage = %last_stage,
            stage = %FileStage::Failed,
            "File failed, moving to error roster"
        );
        self.ledger.mark_errored(entry)?;
        self.ledger.persist()?;
        Ok(FileOutcome::Quarantined {
            last_stage,
            reason: err.to_string(),
        })
    }
}
