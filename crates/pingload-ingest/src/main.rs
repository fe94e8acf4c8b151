//! Pingload Ingest - bulk loader entry point

use anyhow::Result;
use clap::Parser;
use pingload_common::logging::{init_logging, LogConfig, LogLevel};
use pingload_ingest::cli::{execute, Cli};
use pingload_ingest::config::IngestConfig;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("pingload-ingest")
        .build()
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = cli.apply(IngestConfig::from_env()?)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current file");
            on_signal.cancel();
        }
    });

    execute(&cli, config, cancel).await?;
    info!("Done");
    Ok(())
}
