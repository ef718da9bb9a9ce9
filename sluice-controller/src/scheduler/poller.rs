//! Monitor poller
//!
//! Claims due monitor instances on every tick and runs their activations.
//! Each activation runs in its own task, bounded by a semaphore.

use chrono::{DateTime, Utc};
use sluice_core::domain::monitor::MonitorInstance;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::repository::checkpoint::{CheckpointError, CheckpointStore};
use crate::service::monitor::{Activation, MonitorOrchestrator};

#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// How often due instances are claimed
    pub tick_interval: Duration,

    /// Maximum number of activations in flight
    pub max_concurrent_activations: usize,

    /// How long a claimed instance stays invisible to other ticks
    pub lease: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            max_concurrent_activations: 8,
            lease: Duration::from_secs(120),
        }
    }
}

/// Scheduler that continuously activates due monitor instances
pub struct MonitorScheduler {
    store: Arc<dyn CheckpointStore>,
    orchestrator: Arc<MonitorOrchestrator>,
    semaphore: Arc<Semaphore>,
    tick_interval: Duration,
    lease: chrono::Duration,
}

impl MonitorScheduler {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        orchestrator: Arc<MonitorOrchestrator>,
        options: SchedulerOptions,
    ) -> Self {
        let lease =
            chrono::Duration::from_std(options.lease).unwrap_or_else(|_| chrono::Duration::minutes(2));

        Self {
            store,
            orchestrator,
            semaphore: Arc::new(Semaphore::new(options.max_concurrent_activations.max(1))),
            tick_interval: options.tick_interval,
            lease,
        }
    }

    /// Starts the tick loop
    pub async fn run(&self) {
        info!(
            "Starting monitor scheduler (tick: {:?})",
            self.tick_interval
        );

        let mut interval = time::interval(self.tick_interval);

        loop {
            interval.tick().await;

            match self.tick_once(Utc::now()).await {
                Ok(activated) => {
                    if activated > 0 {
                        debug!("Activated {} monitor(s) this tick", activated);
                    }
                }
                Err(e) => {
                    error!("Error during scheduler tick: {}", e);
                }
            }
        }
    }

    /// Claims and activates every instance due at `now`, up to free capacity
    pub async fn tick_once(&self, now: DateTime<Utc>) -> Result<usize, CheckpointError> {
        let capacity = self.semaphore.available_permits();
        if capacity == 0 {
            debug!("All activation slots busy, skipping claim");
            return Ok(0);
        }

        let due = self.store.claim_due(now, self.lease, capacity).await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!("Claimed {} due monitor(s)", due.len());

        let mut handles = Vec::new();

        for instance in due {
            // An unclaimed slot leaves the instance leased; it is retried once the lease expires
            if let Ok(permit) = self.semaphore.clone().try_acquire_owned() {
                handles.push(self.spawn_activation(instance, now, permit));
            } else {
                debug!("No free activation slot for monitor {}", instance.id);
            }
        }

        let activated = handles.len();

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Activation task panicked: {}", e);
            }
        }

        Ok(activated)
    }

    fn spawn_activation(
        &self,
        instance: MonitorInstance,
        now: DateTime<Utc>,
        permit: OwnedSemaphorePermit,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let orchestrator = Arc::clone(&self.orchestrator);

        tokio::spawn(async move {
            Self::activate(store.as_ref(), &orchestrator, instance, now).await;
            // Permit is released when the activation ends
            drop(permit);
        })
    }

    /// Runs one activation and persists its outcome
    async fn activate(
        store: &dyn CheckpointStore,
        orchestrator: &MonitorOrchestrator,
        instance: MonitorInstance,
        now: DateTime<Utc>,
    ) {
        let id = instance.id;
        let job_id = instance.checkpoint.job_id.clone();

        match orchestrator.activate(instance.checkpoint, now).await {
            Activation::Continue { checkpoint, wake_at } => {
                match store.reschedule(id, checkpoint, wake_at).await {
                    Ok(true) => debug!("Monitor {} for job {} sleeps until {}", id, job_id, wake_at),
                    Ok(false) => info!("Monitor {} finished while polling job {}", id, job_id),
                    Err(e) => error!("Failed to reschedule monitor {}: {}", id, e),
                }
            }
            Activation::Done { checkpoint } => match store.complete(id, checkpoint.clone()).await {
                Ok(true) => {
                    info!("Monitor {} done: job {} completed", id, job_id);
                    orchestrator.finish(&checkpoint).await;
                }
                Ok(false) => info!("Monitor {} finished while polling job {}", id, job_id),
                Err(e) => error!("Failed to complete monitor {}: {}", id, e),
            },
        }
    }
}
