//! Monitor Service
//!
//! A monitor instance polls one job until the compute service reports it
//! Completed. Each activation is stateless apart from the checkpoint it is
//! given: query the job once, then either finish or ask to be woken again
//! after the polling interval.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::monitor::{MonitorInstance, MonitorStatus, OrchestrationCheckpoint};
use sluice_core::dto::monitor::StartMonitor;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::repository::checkpoint::{CheckpointError, CheckpointStore, Started};
use crate::repository::compute::ComputeConnector;
use crate::service::submission::{MAX_ID_LENGTH, check_id};

/// Default wait between two status queries of the same job
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default bound on a single status query
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid monitor request: {0}")]
    Invalid(String),

    #[error("monitor instance {0} not found")]
    NotFound(Uuid),

    #[error("monitor instance {id} already finished ({status})")]
    AlreadyFinished { id: Uuid, status: MonitorStatus },

    #[error(transparent)]
    Store(CheckpointError),
}

impl From<CheckpointError> for MonitorError {
    fn from(err: CheckpointError) -> Self {
        match err {
            CheckpointError::NotFound(id) => MonitorError::NotFound(id),
            other => MonitorError::Store(other),
        }
    }
}

/// What an activation decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Not complete yet; persist the checkpoint and wake at `wake_at`
    Continue {
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    },

    /// The job completed
    Done { checkpoint: OrchestrationCheckpoint },
}

/// Runs once a monitored job has completed
#[async_trait]
pub trait CompletionHook: Send + Sync {
    async fn on_complete(&self, checkpoint: &OrchestrationCheckpoint);
}

/// Hook that only records the completion in the log
pub struct LoggingCompletionHook;

#[async_trait]
impl CompletionHook for LoggingCompletionHook {
    async fn on_complete(&self, checkpoint: &OrchestrationCheckpoint) {
        tracing::info!("Job {} completed", checkpoint.job_id);
    }
}

pub struct MonitorOrchestrator {
    connector: Arc<dyn ComputeConnector>,
    hook: Arc<dyn CompletionHook>,
    polling_interval: chrono::Duration,
    status_timeout: Duration,
}

impl MonitorOrchestrator {
    pub fn new(
        connector: Arc<dyn ComputeConnector>,
        polling_interval: Duration,
        status_timeout: Duration,
    ) -> Self {
        let polling_interval = chrono::Duration::from_std(polling_interval)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));

        Self {
            connector,
            hook: Arc::new(LoggingCompletionHook),
            polling_interval,
            status_timeout,
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// One activation from `checkpoint` at time `now`
    ///
    /// Never fails: a status query that errors or times out counts as
    /// "not complete yet".
    pub async fn activate(&self, checkpoint: OrchestrationCheckpoint, now: DateTime<Utc>) -> Activation {
        let complete = self.is_job_complete(&checkpoint.job_id).await;
        let checkpoint = checkpoint.polled_at(now);

        if complete {
            Activation::Done { checkpoint }
        } else {
            Activation::Continue {
                checkpoint,
                wake_at: now + self.polling_interval,
            }
        }
    }

    /// Runs the completion hook
    pub async fn finish(&self, checkpoint: &OrchestrationCheckpoint) {
        self.hook.on_complete(checkpoint).await;
    }

    async fn is_job_complete(&self, job_id: &str) -> bool {
        let compute = match self.connector.connect() {
            Ok(compute) => compute,
            Err(e) => {
                tracing::warn!("Could not connect to compute service for job {}: {}", job_id, e);
                return false;
            }
        };

        match tokio::time::timeout(self.status_timeout, compute.get_job_state(job_id)).await {
            Ok(Ok(state)) => {
                tracing::debug!("Job {} is {}", job_id, state);
                state.is_terminal()
            }
            Ok(Err(e)) => {
                tracing::warn!("Status query for job {} failed: {}", job_id, e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    "Status query for job {} timed out after {:?}",
                    job_id,
                    self.status_timeout
                );
                false
            }
        }
    }
}

// =============================================================================
// Instance management
// =============================================================================

/// Starts monitoring a job, or returns the instance already polling it
///
/// The first activation is due immediately.
pub async fn start_monitor(
    store: &dyn CheckpointStore,
    req: StartMonitor,
) -> Result<Started, MonitorError> {
    let job_id = req.job_id.trim();
    if job_id.is_empty() {
        return Err(MonitorError::Invalid("job_id is required".to_string()));
    }
    check_id("job_id", job_id, MAX_ID_LENGTH).map_err(MonitorError::Invalid)?;

    let started = store
        .create_or_get(OrchestrationCheckpoint::new(job_id), Utc::now())
        .await?;

    if started.created {
        tracing::info!(
            "Monitor {} started for job {}",
            started.instance.id,
            job_id
        );
    } else {
        tracing::info!(
            "Job {} is already monitored by {}",
            job_id,
            started.instance.id
        );
    }

    Ok(started)
}

pub async fn get_monitor(store: &dyn CheckpointStore, id: Uuid) -> Result<MonitorInstance, MonitorError> {
    store.get(id).await?.ok_or(MonitorError::NotFound(id))
}

/// Cancels a polling instance
pub async fn cancel_monitor(
    store: &dyn CheckpointStore,
    id: Uuid,
) -> Result<MonitorInstance, MonitorError> {
    let cancelled = store.cancel(id).await?;
    let instance = get_monitor(store, id).await?;

    if !cancelled {
        return Err(MonitorError::AlreadyFinished {
            id,
            status: instance.status,
        });
    }

    tracing::info!("Monitor {} for job {} cancelled", id, instance.checkpoint.job_id);
    Ok(instance)
}
