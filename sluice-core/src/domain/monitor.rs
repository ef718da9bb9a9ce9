//! Monitor domain types
//!
//! A monitor instance follows one remote job until it completes. Its only
//! durable state is the checkpoint; everything else is bookkeeping of the
//! scheduler that re-activates it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Everything a monitor needs to resume after a restart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationCheckpoint {
    pub job_id: String,

    #[serde(default)]
    pub last_polled_at: Option<DateTime<Utc>>,
}

impl OrchestrationCheckpoint {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            last_polled_at: None,
        }
    }

    /// Carries the checkpoint forward to the next activation
    pub fn polled_at(self, at: DateTime<Utc>) -> Self {
        Self {
            last_polled_at: Some(at),
            ..self
        }
    }
}

/// Lifecycle of a monitor instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorStatus {
    /// Waiting for the next activation
    Polling,

    /// The job completed and the completion hook ran
    Done,

    /// Stopped by an operator before the job completed
    Cancelled,
}

impl MonitorStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorStatus::Polling)
    }
}

impl std::fmt::Display for MonitorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonitorStatus::Polling => write!(f, "Polling"),
            MonitorStatus::Done => write!(f, "Done"),
            MonitorStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Persisted record of one monitor instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInstance {
    pub id: Uuid,
    pub checkpoint: OrchestrationCheckpoint,
    pub status: MonitorStatus,

    /// Earliest time of the next activation
    pub wake_at: DateTime<Utc>,

    /// Number of completed activations
    pub polls: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_round_trips_from_job_id_only() {
        let checkpoint: OrchestrationCheckpoint =
            serde_json::from_str(r#"{"job_id":"J1"}"#).unwrap();
        assert_eq!(checkpoint, OrchestrationCheckpoint::new("J1"));
    }

    #[test]
    fn test_polled_at_keeps_job_id() {
        let now = Utc::now();
        let checkpoint = OrchestrationCheckpoint::new("J1").polled_at(now);
        assert_eq!(checkpoint.job_id, "J1");
        assert_eq!(checkpoint.last_polled_at, Some(now));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!MonitorStatus::Polling.is_terminal());
        assert!(MonitorStatus::Done.is_terminal());
        assert!(MonitorStatus::Cancelled.is_terminal());
    }
}
