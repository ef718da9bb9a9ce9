//! Task domain types

use serde::{Deserialize, Serialize};

use crate::domain::signing::SignedUrl;
use crate::domain::work_item::WorkItem;

/// A concrete unit of remote execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique within the job
    pub task_id: String,
    pub command_line: String,
    pub input_bindings: Vec<WorkItem>,
    pub output_bindings: Vec<OutputBinding>,
}

/// Where a task's produced files are uploaded once it ends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputBinding {
    /// File path or glob pattern on the compute node
    pub file_pattern: String,

    /// Write-signed URL of the destination container
    pub destination: SignedUrl,

    /// Path inside the destination container, if any
    pub destination_path: Option<String>,

    pub upload_condition: UploadCondition,
}

/// When an output binding is uploaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadCondition {
    OnSuccess,
    OnFailure,
    Always,
}

impl std::fmt::Display for UploadCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadCondition::OnSuccess => write!(f, "taskSuccess"),
            UploadCondition::OnFailure => write!(f, "taskFailure"),
            UploadCondition::Always => write!(f, "taskCompletion"),
        }
    }
}
