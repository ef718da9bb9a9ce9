//! Remote job state

use serde::{Deserialize, Serialize};

/// State of a job as reported by the compute service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    Active,
    Disabling,
    Disabled,
    Enabling,
    Terminating,
    Completed,
    Deleting,
}

impl JobState {
    /// Only `Completed` ends monitoring
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobState::Active => "active",
            JobState::Disabling => "disabling",
            JobState::Disabled => "disabled",
            JobState::Enabling => "enabling",
            JobState::Terminating => "terminating",
            JobState::Completed => "completed",
            JobState::Deleting => "deleting",
        };
        write!(f, "{}", name)
    }
}
