//! Ingestion configuration
//!
//! Loaded from `PINGLOAD_*` environment variables (a `.env` file is read
//! first by the binary). Command-line flags override individual fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ledger::GapPolicy;
use crate::payload::{CopyTarget, TimestampMode, DEFAULT_NULL_TOKEN};

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./checkpoint")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestConfig {
    /// Directory holding the ledger's checkpoint rosters
    pub checkpoint_dir: PathBuf,
    /// Destination table for pings
    pub target_table: String,
    /// Column recording each row's source file index
    pub source_column: String,
    /// Venue dimension table (`id`, `name`)
    pub venue_table: String,
    /// Token written for absent values in the bulk payload
    pub null_token: String,
    /// Stop after this many committed files (None = unlimited)
    pub max_files: Option<usize>,
    pub gap_policy: GapPolicy,
    pub timestamp_mode: TimestampMode,
    /// Ask the destination for rows already loaded before reprocessing a file
    pub reconcile_with_destination: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            target_table: "pings".to_string(),
            source_column: "source".to_string(),
            venue_table: "venue".to_string(),
            null_token: DEFAULT_NULL_TOKEN.to_string(),
            max_files: None,
            gap_policy: GapPolicy::default(),
            timestamp_mode: TimestampMode::default(),
            reconcile_with_destination: true,
        }
    }
}

impl IngestConfig {
    /// Load ingestion configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source, keeping defaults for unset keys.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(dir) = lookup("PINGLOAD_CHECKPOINT_DIR") {
            config.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(table) = lookup("PINGLOAD_TARGET_TABLE") {
            config.target_table = table;
        }
        if let Some(column) = lookup("PINGLOAD_SOURCE_COLUMN") {
            config.source_column = column;
        }
        if let Some(table) = lookup("PINGLOAD_VENUE_TABLE") {
            config.venue_table = table;
        }
        if let Some(token) = lookup("PINGLOAD_NULL_TOKEN") {
            config.null_token = token;
        }
        if let Some(raw) = lookup("PINGLOAD_MAX_FILES") {
            let max: usize = raw
                .trim()
                .parse()
                .map_err(|_| anyhow::anyhow!("PINGLOAD_MAX_FILES must be a non-negative integer, got: {}", raw))?;
            config.max_files = (max > 0).then_some(max);
        }
        if let Some(raw) = lookup("PINGLOAD_GAP_POLICY") {
            config.gap_policy = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = lookup("PINGLOAD_TIMESTAMP_MODE") {
            config.timestamp_mode = raw.parse().map_err(anyhow::Error::msg)?;
        }
        if let Some(raw) = lookup("PINGLOAD_RECONCILE") {
            config.reconcile_with_destination = raw.trim().parse().map_err(|_| {
                anyhow::anyhow!("PINGLOAD_RECONCILE must be 'true' or 'false', got: {}", raw)
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.checkpoint_dir.as_os_str().is_empty() {
            anyhow::bail!("PINGLOAD_CHECKPOINT_DIR cannot be empty");
        }
        if self.target_table.trim().is_empty() {
            anyhow::bail!("PINGLOAD_TARGET_TABLE cannot be empty");
        }
        if self.source_column.trim().is_empty() {
            anyhow::bail!("PINGLOAD_SOURCE_COLUMN cannot be empty");
        }
        if self.venue_table.trim().is_empty() {
            anyhow::bail!("PINGLOAD_VENUE_TABLE cannot be empty");
        }
        // The token is matched literally against raw COPY fields
        if self.null_token.is_empty() || self.null_token.contains(['\t', '\n', '\r']) {
            anyhow::bail!("PINGLOAD_NULL_TOKEN must be non-empty and free of tabs and newlines");
        }
        Ok(())
    }

    pub fn copy_target(&self) -> CopyTarget {
        CopyTarget {
            table: self.target_table.clone(),
            source_column: self.source_column.clone(),
            null_token: self.null_token.clone(),
        }
    }
}
