//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod monitor;
mod submit;

pub use monitor::MonitorCommands;
pub use submit::SubmitArgs;

use anyhow::Result;
use clap::Subcommand;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Provision pool and job, then submit one task per input object and application
    Submit(SubmitArgs),
    /// Job monitor management
    Monitor {
        #[command(subcommand)]
        command: MonitorCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Submit(args) => submit::handle_submit(args, config).await,
        Commands::Monitor { command } => monitor::handle_monitor_command(command, config).await,
    }
}
