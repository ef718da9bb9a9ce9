//! Submit command handler
//!
//! Builds a submission from flags (or the environment variables they fall
//! back to) and sends it to the controller.

use anyhow::{Result, bail};
use clap::Args;
use colored::*;
use sluice_client::ControllerClient;
use sluice_core::domain::application::ApplicationDescriptor;
use sluice_core::domain::pool::NodePlatform;
use sluice_core::domain::settings::{
    DEFAULT_AUTOSCALE_EVALUATION_MINUTES, PoolSettings, ScaleSettings, StorageSettings,
};
use sluice_core::dto::monitor::StartMonitor;
use sluice_core::dto::submission::{JobSubmissionResult, SubmitJob};

use crate::commands::monitor::print_handle;
use crate::config::Config;

/// Submission settings
#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Pool to create or reuse
    #[arg(long, env = "POOL_ID")]
    pub pool_id: String,

    /// Job to create or reuse
    #[arg(long, env = "POOL_JOB_ID")]
    pub job_id: String,

    /// Node VM size (e.g. standard_d1_v2)
    #[arg(long, env = "POOL_VM_SIZE")]
    pub vm_size: String,

    /// Node operating system: windows or linux
    #[arg(long, env = "POOL_OS_FAMILY", default_value = "windows", value_parser = parse_platform)]
    pub os_family: NodePlatform,

    /// Scale the pool with the pending-task formula instead of a fixed count
    #[arg(long, env = "POOL_USE_AUTOSCALE")]
    pub use_autoscale: bool,

    #[arg(long, env = "POOL_STARTING_VM_COUNT")]
    pub starting_vm_count: Option<u32>,

    #[arg(long, env = "POOL_MIN_VM_COUNT")]
    pub min_vm_count: Option<u32>,

    #[arg(long, env = "POOL_MAX_VM_COUNT")]
    pub max_vm_count: Option<u32>,

    /// Fixed node count when autoscale is off
    #[arg(long, env = "POOL_TARGET_VM_COUNT")]
    pub target_vm_count: Option<u32>,

    /// Terminate the job once all its tasks finish
    #[arg(long, env = "POOL_SHOULD_DELETE_JOB")]
    pub delete_job: bool,

    #[arg(long, env = "BATCH_STORAGE_INPUT_CONTAINER_NAME")]
    pub input_container: String,

    #[arg(long, env = "BATCH_STORAGE_OUTPUT_CONTAINER_NAME")]
    pub output_container: String,

    /// Application package ids (comma-separated for several)
    #[arg(long, env = "BATCH_APPLICATION_ID", value_delimiter = ',', required = true)]
    pub application_id: Vec<String>,

    /// Package versions, one per application id
    #[arg(long, env = "BATCH_APPLICATION_VERSION", value_delimiter = ',', required = true)]
    pub application_version: Vec<String>,

    /// Executables relative to the package root, one per application id
    #[arg(long, env = "BATCH_APPLICATION_EXECUTABLE", value_delimiter = ',', required = true)]
    pub application_executable: Vec<String>,

    /// Start a monitor for the job once the tasks are submitted
    #[arg(long)]
    pub monitor: bool,

    /// Print the raw submission result as JSON
    #[arg(long)]
    pub json: bool,
}

fn parse_platform(value: &str) -> std::result::Result<NodePlatform, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "windows" => Ok(NodePlatform::Windows),
        "linux" => Ok(NodePlatform::Linux),
        other => Err(format!("unknown OS family '{}' (expected windows or linux)", other)),
    }
}

impl SubmitArgs {
    /// Builds the submission request
    pub fn to_request(&self) -> Result<SubmitJob> {
        let scale = if self.use_autoscale {
            match (self.starting_vm_count, self.min_vm_count, self.max_vm_count) {
                (Some(starting_nodes), Some(min_nodes), Some(max_nodes)) => ScaleSettings::Autoscale {
                    starting_nodes,
                    min_nodes,
                    max_nodes,
                    evaluation_interval_minutes: DEFAULT_AUTOSCALE_EVALUATION_MINUTES,
                },
                _ => bail!(
                    "autoscale needs --starting-vm-count, --min-vm-count and --max-vm-count"
                ),
            }
        } else {
            match self.target_vm_count {
                Some(target_nodes) => ScaleSettings::Fixed { target_nodes },
                None => bail!("--target-vm-count is required when autoscale is off"),
            }
        };

        let count = self.application_id.len();
        if self.application_version.len() != count || self.application_executable.len() != count {
            bail!(
                "got {} application id(s), {} version(s) and {} executable(s); counts must match",
                count,
                self.application_version.len(),
                self.application_executable.len()
            );
        }

        let applications = self
            .application_id
            .iter()
            .zip(&self.application_version)
            .zip(&self.application_executable)
            .map(|((id, version), executable)| ApplicationDescriptor {
                id: id.trim().to_string(),
                version: version.trim().to_string(),
                executable: executable.trim().to_string(),
            })
            .collect();

        Ok(SubmitJob {
            pool: PoolSettings {
                pool_id: self.pool_id.clone(),
                job_id: self.job_id.clone(),
                vm_size: self.vm_size.clone(),
                platform: self.os_family,
                scale,
                delete_job_on_completion: self.delete_job,
            },
            storage: StorageSettings {
                input_container: self.input_container.clone(),
                output_container: self.output_container.clone(),
            },
            applications,
        })
    }
}

/// Submit a batch and optionally start monitoring it
pub async fn handle_submit(args: SubmitArgs, config: &Config) -> Result<()> {
    let client = ControllerClient::new(&config.controller_url);
    let req = args.to_request()?;

    if !args.json {
        println!(
            "{} job {} on pool {}...",
            "Submitting".bold(),
            req.pool.job_id.cyan(),
            req.pool.pool_id.cyan()
        );
    }

    let result = client.submit_job(&req).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if args.monitor {
        let handle = client
            .start_monitor(&StartMonitor {
                job_id: result.job_id.clone(),
            })
            .await?;
        println!();
        print_handle(&client, &handle);
    }

    Ok(())
}

fn print_result(result: &JobSubmissionResult) {
    println!(
        "{}",
        format!("✓ Submitted {} task(s)", result.task_ids.len())
            .green()
            .bold()
    );
    println!();
    println!("  {}  {}", "Pool:".bold(), result.pool_id);
    println!("  {}   {}", "Job:".bold(), result.job_id);

    if result.task_ids.is_empty() {
        println!("{}", "  No input objects found; nothing was submitted.".yellow());
        return;
    }

    println!("  {}", "Tasks:".bold());
    for task_id in &result.task_ids {
        println!("    {} {}", "▸".cyan(), task_id);
    }
}
