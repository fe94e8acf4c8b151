//! Command-line interface
//!
//! ```text
//! pingload-ingest init
//! pingload-ingest register /data/incoming
//! pingload-ingest run --max-files 10
//! pingload-ingest status --json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::db::{create_pool, DbConfig};
use crate::input::discover_inputs;
use crate::ledger::store::CsvCheckpointStore;
use crate::ledger::{FileLedger, GapPolicy};
use crate::payload::TimestampMode;
use crate::pipeline::{IngestionPipeline, PipelineOptions, RunSummary};
use crate::sink::PgSink;
use crate::venue::VenueIndex;

#[derive(Parser, Debug)]
#[command(name = "pingload-ingest")]
#[command(author, version, about = "Resumable bulk loader for geolocation ping files")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the checkpoint rosters
    #[arg(long, global = true, env = "PINGLOAD_CHECKPOINT_DIR")]
    pub checkpoint_dir: Option<PathBuf>,

    /// Row-id allocation policy after a quarantined file
    #[arg(long, global = true, env = "PINGLOAD_GAP_POLICY")]
    pub gap_policy: Option<GapPolicy>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an empty checkpoint
    Init,

    /// Add every *.gz file under a directory to the ledger
    Register {
        /// Directory to scan recursively
        dir: PathBuf,
    },

    /// Load pending files into the destination table
    Run {
        /// Stop after this many committed files (0 = unlimited)
        #[arg(long, env = "PINGLOAD_MAX_FILES")]
        max_files: Option<usize>,

        /// Timestamp rendering for the destination column
        #[arg(long, env = "PINGLOAD_TIMESTAMP_MODE")]
        timestamp_mode: Option<TimestampMode>,

        /// Skip the destination row-count check before each file
        #[arg(long)]
        no_reconcile: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show ledger counts and the next row id
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Overlay command-line flags onto `config`.
    pub fn apply(&self, mut config: IngestConfig) -> Result<IngestConfig> {
        if let Some(dir) = &self.checkpoint_dir {
            config.checkpoint_dir = dir.clone();
        }
        if let Some(policy) = self.gap_policy {
            config.gap_policy = policy;
        }
        if let Command::Run {
            max_files,
            timestamp_mode,
            no_reconcile,
            ..
        } = &self.command
        {
            if let Some(max) = max_files {
                config.max_files = (*max > 0).then_some(*max);
            }
            if let Some(mode) = timestamp_mode {
                config.timestamp_mode = *mode;
            }
            if *no_reconcile {
                config.reconcile_with_destination = false;
            }
        }
        config.validate()?;
        Ok(config)
    }
}

fn store(config: &IngestConfig) -> CsvCheckpointStore {
    CsvCheckpointStore::new(&config.checkpoint_dir)
}

/// Execute a parsed command against `config`.
pub async fn execute(cli: &Cli, config: IngestConfig, cancel: CancellationToken) -> Result<()> {
    match &cli.command {
        Command::Init => init(&config),
        Command::Register { dir } => register(&config, dir),
        Command::Run { json, .. } => {
            let summary = run(&config, cancel).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            Ok(())
        },
        Command::Status { json } => status(&config, *json),
    }
}

fn init(config: &IngestConfig) -> Result<()> {
    FileLedger::create(store(config), config.gap_policy)
        .with_context(|| format!("Failed to initialize ledger in {}", config.checkpoint_dir.display()))?;
    info!(dir = %config.checkpoint_dir.display(), "Ledger initialized");
    println!("Initialized empty ledger in {}", config.checkpoint_dir.display());
    Ok(())
}

fn register(config: &IngestConfig, dir: &std::path::Path) -> Result<()> {
    let mut ledger = FileLedger::load(store(config), config.gap_policy)?;
    let found = discover_inputs(dir).with_context(|| format!("Failed to scan {}", dir.display()))?;

    let mut added = 0usize;
    for path in &found {
        if let Some(entry) = ledger.register(path) {
            info!(index = entry.sequence_index, path = %entry.path, "File registered");
            added += 1;
        }
    }
    ledger.persist()?;

    println!(
        "Registered {} new file(s), {} already known",
        added,
        found.len() - added
    );
    Ok(())
}

/// Connect to the destination and process pending files.
pub async fn run(config: &IngestConfig, cancel: CancellationToken) -> Result<RunSummary> {
    let ledger = FileLedger::load(store(config), config.gap_policy)?;

    let db_config = DbConfig::from_env()?;
    let pool = create_pool(&db_config).await?;
    let venues = VenueIndex::load_from_db(&pool, &config.venue_table)
        .await
        .with_context(|| format!("Failed to load venues from {}", config.venue_table))?;
    if venues.is_empty() {
        warn!(table = %config.venue_table, "Venue table is empty, no venue ids will be resolved");
    }

    let sink = PgSink::new(pool, config.copy_target());
    let mut pipeline = IngestionPipeline::new(ledger, sink, Arc::new(venues), PipelineOptions::from(config))
        .with_cancellation(cancel);

    let summary = pipeline.run().await?;
    Ok(summary)
}

fn status(config: &IngestConfig, json: bool) -> Result<()> {
    let ledger = FileLedger::load(store(config), config.gap_policy)?;
    let summary = ledger.summary();

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Checkpoint:     {}", config.checkpoint_dir.display());
    println!("Pending:        {}", summary.pending);
    println!("Processed:      {}", summary.processed);
    println!("Errored:        {}", summary.errored);
    println!("Rows committed: {}", summary.rows_committed);
    match summary.next_row_id {
        Some(id) => println!("Next row id:    {}", id),
        None => println!("Next row id:    blocked (allocation gap)"),
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!(
        "Committed {} file(s), {} row(s); quarantined {}; reconciled {}; skipped {} record(s); stopped: {:?}",
        summary.files_committed,
        summary.rows_loaded,
        summary.files_quarantined,
        summary.files_reconciled,
        summary.skipped.total(),
        summary.stop_reason
    );
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from([
            "pingload-ingest",
            "--checkpoint-dir",
            "/tmp/ckpt",
            "run",
            "--max-files",
            "0",
            "--timestamp-mode",
            "utc_aware",
            "--no-reconcile",
        ])
        .unwrap();

        let config = IngestConfig {
            max_files: Some(3),
            ..IngestConfig::default()
        };
        let config = cli.apply(config).unwrap();
        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/ckpt"));
        assert_eq!(config.max_files, None);
        assert_eq!(config.timestamp_mode, TimestampMode::UtcAware);
        assert!(!config.reconcile_with_destination);
    }

    #[test]
    fn test_register_requires_dir() {
        assert!(Cli::try_parse_from(["pingload-ingest", "register"]).is_err());
    }
}
