//! Monitor DTOs

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to start monitoring a job
///
/// Unknown fields are ignored, so a `JobSubmissionResult` can be posted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartMonitor {
    #[serde(alias = "jobId")]
    pub job_id: String,
}

/// Handle returned when a monitor instance is started
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorHandle {
    pub instance_id: Uuid,

    /// Where to query the instance status
    pub status_query_uri: String,

    /// Where to cancel the instance
    pub cancel_uri: String,
}
