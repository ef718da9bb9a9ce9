//! Submission DTOs

use serde::{Deserialize, Serialize};

use crate::domain::application::ApplicationDescriptor;
use crate::domain::settings::{PoolSettings, StorageSettings};

/// Request to plan and submit one batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub pool: PoolSettings,
    pub storage: StorageSettings,
    pub applications: Vec<ApplicationDescriptor>,
}

/// Result of a successful submission
///
/// Also the only input needed to start monitoring the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSubmissionResult {
    pub pool_id: String,
    pub job_id: String,
    pub task_ids: Vec<String>,
}
