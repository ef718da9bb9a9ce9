//! Monitor command handlers
//!
//! Start, inspect and cancel the controller's job monitors.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sluice_client::ControllerClient;
use sluice_core::domain::monitor::{MonitorInstance, MonitorStatus};
use sluice_core::dto::monitor::{MonitorHandle, StartMonitor};
use std::time::Duration;
use uuid::Uuid;

use crate::config::Config;

/// Monitor subcommands
#[derive(Subcommand)]
pub enum MonitorCommands {
    /// Start monitoring a job until it completes
    Start {
        /// Job ID
        job_id: String,
    },
    /// Show a monitor instance
    Status {
        /// Monitor instance ID
        id: String,

        /// Keep polling until the monitor finishes
        #[arg(short, long)]
        watch: bool,

        /// Seconds between two polls with --watch
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
    /// Cancel a polling monitor instance
    Cancel {
        /// Monitor instance ID
        id: String,
    },
}

/// Handle monitor commands
pub async fn handle_monitor_command(command: MonitorCommands, config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);

    match command {
        MonitorCommands::Start { job_id } => start_monitor(&client, job_id).await,
        MonitorCommands::Status {
            id,
            watch,
            interval,
        } => show_monitor(&client, &id, watch, Duration::from_secs(interval.max(1))).await,
        MonitorCommands::Cancel { id } => cancel_monitor(&client, &id).await,
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id.trim()).with_context(|| format!("'{}' is not a monitor instance ID", id))
}

async fn start_monitor(client: &ControllerClient, job_id: String) -> Result<()> {
    let handle = client.start_monitor(&StartMonitor { job_id }).await?;
    print_handle(client, &handle);
    Ok(())
}

async fn show_monitor(
    client: &ControllerClient,
    id: &str,
    watch: bool,
    interval: Duration,
) -> Result<()> {
    let id = parse_id(id)?;
    let mut instance = client.get_monitor(id).await?;
    print_instance(&instance);

    while watch && !instance.status.is_terminal() {
        tokio::time::sleep(interval).await;

        let next = client.get_monitor(id).await?;
        if next.polls != instance.polls || next.status != instance.status {
            println!();
            print_instance(&next);
        }
        instance = next;
    }

    Ok(())
}

async fn cancel_monitor(client: &ControllerClient, id: &str) -> Result<()> {
    let id = parse_id(id)?;

    match client.cancel_monitor(id).await {
        Ok(instance) => {
            println!("{}", "✓ Monitor cancelled".green().bold());
            print_instance(&instance);
            Ok(())
        }
        Err(e) if e.is_conflict() => {
            println!("{}", format!("Monitor {} already finished", id).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn print_handle(client: &ControllerClient, handle: &MonitorHandle) {
    println!("{}", "✓ Monitor started".green().bold());
    println!("  Instance: {}", handle.instance_id.to_string().cyan());
    println!("  Status:   {}", client.resolve(&handle.status_query_uri).dimmed());
    println!("  Cancel:   {}", client.resolve(&handle.cancel_uri).dimmed());
}

fn print_instance(instance: &MonitorInstance) {
    println!("  {} Monitor {}", "▸".cyan(), instance.id.to_string().dimmed());
    println!("    Job:      {}", instance.checkpoint.job_id);
    println!("    Status:   {}", colorize_status(instance.status));
    println!("    Polls:    {}", instance.polls);
    if let Some(polled) = instance.checkpoint.last_polled_at {
        println!("    Polled:   {}", polled.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    match instance.completed_at {
        Some(at) => println!("    Finished: {}", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!(
            "    Next:     {}",
            instance.wake_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
    }
}

fn colorize_status(status: MonitorStatus) -> ColoredString {
    match status {
        MonitorStatus::Polling => status.to_string().yellow(),
        MonitorStatus::Done => status.to_string().green(),
        MonitorStatus::Cancelled => status.to_string().red(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&format!(" {} ", id)).unwrap(), id);
        assert!(parse_id("not-a-uuid").is_err());
    }
}
