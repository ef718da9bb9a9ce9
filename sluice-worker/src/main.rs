//! Sluice Worker
//!
//! The program a submitted task runs on a compute node. It reads the staged
//! input file and drops a stamped copy into the output directory, where the
//! task's success binding picks it up.

mod task;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sluice-worker")]
#[command(about = "Reads one staged input file and writes its stamped output", long_about = None)]
struct Cli {
    /// Input file, relative paths resolve against the working directory
    input: PathBuf,

    /// Directory the output file is written to (created if missing)
    output_dir: PathBuf,
}

fn main() -> Result<()> {
    // Logs go to stderr so they land in the task's stderr.txt
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sluice_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;

    let written = task::run(&cwd, &cli.input, &cli.output_dir)?;
    info!("Wrote {}", written.display());

    Ok(())
}
