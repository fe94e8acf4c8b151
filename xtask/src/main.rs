//! Build automation tasks for the ping loader workspace
//!
//! Run through `cargo run -p xtask -- <task>`:
//! - `generate-cli-docs`: write the CLI reference from the clap definitions

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for pingload", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate the CLI reference in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, render_cli_reference())?;

    println!("Generated CLI documentation at: {}", file_path.display());
    Ok(())
}

/// The full `cli-reference.md` body.
fn render_cli_reference() -> String {
    let markdown = clap_markdown::help_markdown::<pingload_ingest::cli::Cli>();

    format!(
        r#"# pingload-ingest CLI Reference

Generated from the CLI source on {}.

## Workflow

```bash
# One-time: create the checkpoint rosters
pingload-ingest init --checkpoint-dir /var/lib/pingload

# Add new input files (recursive *.gz scan, sorted by path)
pingload-ingest register /data/incoming

# Load pending files; safe to interrupt and rerun
pingload-ingest run --max-files 50

# Inspect progress
pingload-ingest status --json
```

## Commands

{}

## Environment Variables

- `DATABASE_URL` - destination PostgreSQL connection string (required for `run`)
- `PINGLOAD_CHECKPOINT_DIR` - checkpoint directory (default: `./checkpoint`)
- `PINGLOAD_TARGET_TABLE` / `PINGLOAD_SOURCE_COLUMN` / `PINGLOAD_VENUE_TABLE`
- `PINGLOAD_NULL_TOKEN` - absent-value token in the COPY payload (default: `\N`)
- `PINGLOAD_MAX_FILES` - committed files per run, 0 for unlimited
- `PINGLOAD_GAP_POLICY` - `skip_errored` (default) or `strict`
- `PINGLOAD_TIMESTAMP_MODE` - `utc_naive` (default) or `utc_aware`
- `PINGLOAD_RECONCILE` - check the destination before reloading a file (default: `true`)
- `PINGLOAD_LOG_LEVEL`, `PINGLOAD_LOG_OUTPUT`, `PINGLOAD_LOG_FORMAT`, `PINGLOAD_LOG_DIR`

---

*To update, run `cargo run -p xtask -- generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    )
}
