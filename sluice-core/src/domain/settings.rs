//! Submission settings
//!
//! Strongly-typed configuration for one batch submission. Settings arrive
//! from the CLI or an HTTP caller and are validated once, at the controller
//! boundary, before any remote call.

use serde::{Deserialize, Serialize};

use crate::domain::pool::NodePlatform;

/// Default autoscale evaluation interval, in minutes
pub const DEFAULT_AUTOSCALE_EVALUATION_MINUTES: u32 = 5;

fn default_evaluation_interval() -> u32 {
    DEFAULT_AUTOSCALE_EVALUATION_MINUTES
}

/// Pool and job settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSettings {
    pub pool_id: String,
    pub job_id: String,
    pub vm_size: String,

    #[serde(default)]
    pub platform: NodePlatform,

    pub scale: ScaleSettings,

    /// Terminate the job automatically once all its tasks finish
    #[serde(default)]
    pub delete_job_on_completion: bool,
}

/// Fixed node count or autoscale bounds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScaleSettings {
    Fixed {
        target_nodes: u32,
    },
    Autoscale {
        starting_nodes: u32,
        min_nodes: u32,
        max_nodes: u32,
        #[serde(default = "default_evaluation_interval")]
        evaluation_interval_minutes: u32,
    },
}

/// Input and output containers of one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    pub input_container: String,
    pub output_container: String,
}
