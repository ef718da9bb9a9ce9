//! Checkpoint Repository
//!
//! Durable record of monitor instances. The checkpoint (`job_id`,
//! `last_polled_at`) is the state a monitor resumes from; the remaining columns
//! belong to the scheduler that wakes instances up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sluice_core::domain::monitor::{MonitorInstance, MonitorStatus, OrchestrationCheckpoint};
use sqlx::PgPool;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("monitor instance {0} not found")]
    NotFound(Uuid),

    #[error("corrupt monitor record: {0}")]
    Corrupt(String),
}

/// Whether `create_or_get` created the instance
#[derive(Debug, Clone)]
pub struct Started {
    pub instance: MonitorInstance,
    pub created: bool,
}

/// Repository trait for monitor instance persistence
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Creates a polling instance for the checkpoint's job, or returns the one
    /// already polling that job
    async fn create_or_get(
        &self,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<Started, CheckpointError>;

    async fn get(&self, id: Uuid) -> Result<Option<MonitorInstance>, CheckpointError>;

    /// Leases up to `limit` polling instances whose wake time has passed
    ///
    /// A leased instance is not returned again until the lease expires or the
    /// instance is rescheduled.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<MonitorInstance>, CheckpointError>;

    /// Persists the continuation of a polling instance and releases its lease
    ///
    /// Returns false if the instance is no longer polling.
    async fn reschedule(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<bool, CheckpointError>;

    /// Marks a polling instance Done
    ///
    /// Returns false if the instance is no longer polling.
    async fn complete(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
    ) -> Result<bool, CheckpointError>;

    /// Cancels a polling instance
    ///
    /// Returns false if the instance already reached a terminal status.
    async fn cancel(&self, id: Uuid) -> Result<bool, CheckpointError>;
}

// =============================================================================
// Postgres
// =============================================================================

/// Postgres implementation of CheckpointStore
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_polling(
        &self,
        checkpoint: &OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<Option<MonitorInstance>, CheckpointError> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            INSERT INTO monitor_instances
                (id, job_id, last_polled_at, status, wake_at, polls, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, $6, $6)
            ON CONFLICT (job_id) WHERE status = 'Polling' DO NOTHING
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&checkpoint.job_id)
        .bind(checkpoint.last_polled_at)
        .bind(status_to_string(MonitorStatus::Polling))
        .bind(wake_at)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MonitorInstance::try_from).transpose()
    }

    async fn find_polling(&self, job_id: &str) -> Result<Option<MonitorInstance>, CheckpointError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM monitor_instances \
             WHERE job_id = $1 AND status = 'Polling'"
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MonitorInstance::try_from).transpose()
    }
}

/// Insert attempts before giving up on a job whose polling instance keeps
/// finishing between the insert and the lookup
const START_ATTEMPTS: usize = 2;

/// Inserts a polling instance, falling back to the one that won the conflict
///
/// The winner may finish before it is read back; the insert is then retried.
async fn insert_or_find<I, IFut, F, FFut>(
    mut insert: I,
    mut find: F,
) -> Result<Started, CheckpointError>
where
    I: FnMut() -> IFut,
    IFut: Future<Output = Result<Option<MonitorInstance>, CheckpointError>>,
    F: FnMut() -> FFut,
    FFut: Future<Output = Result<Option<MonitorInstance>, CheckpointError>>,
{
    for _ in 0..START_ATTEMPTS {
        if let Some(instance) = insert().await? {
            return Ok(Started {
                instance,
                created: true,
            });
        }
        if let Some(instance) = find().await? {
            return Ok(Started {
                instance,
                created: false,
            });
        }
    }

    Err(CheckpointError::Corrupt(
        "polling instance kept finishing while a new one was started".to_string(),
    ))
}

const INSTANCE_COLUMNS: &str = "id, job_id, last_polled_at, status, wake_at, polls, \
                                created_at, updated_at, completed_at";

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn create_or_get(
        &self,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<Started, CheckpointError> {
        insert_or_find(
            || self.insert_polling(&checkpoint, wake_at),
            || self.find_polling(&checkpoint.job_id),
        )
        .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<MonitorInstance>, CheckpointError> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM monitor_instances WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MonitorInstance::try_from).transpose()
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<MonitorInstance>, CheckpointError> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!(
            r#"
            UPDATE monitor_instances
            SET lease_expires_at = $2
            WHERE id IN (
                SELECT id FROM monitor_instances
                WHERE status = 'Polling'
                  AND wake_at <= $1
                  AND (lease_expires_at IS NULL OR lease_expires_at <= $1)
                ORDER BY wake_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {INSTANCE_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(now + lease)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MonitorInstance::try_from).collect()
    }

    async fn reschedule(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<bool, CheckpointError> {
        let result = sqlx::query(
            r#"
            UPDATE monitor_instances
            SET last_polled_at = $2, wake_at = $3, polls = polls + 1,
                lease_expires_at = NULL, updated_at = $4
            WHERE id = $1 AND status = 'Polling'
            "#,
        )
        .bind(id)
        .bind(checkpoint.last_polled_at)
        .bind(wake_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
    ) -> Result<bool, CheckpointError> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE monitor_instances
            SET status = $2, last_polled_at = $3, polls = polls + 1,
                lease_expires_at = NULL, updated_at = $4, completed_at = $4
            WHERE id = $1 AND status = 'Polling'
            "#,
        )
        .bind(id)
        .bind(status_to_string(MonitorStatus::Done))
        .bind(checkpoint.last_polled_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, CheckpointError> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE monitor_instances
            SET status = $2, lease_expires_at = NULL, updated_at = $3, completed_at = $3
            WHERE id = $1 AND status = 'Polling'
            "#,
        )
        .bind(id)
        .bind(status_to_string(MonitorStatus::Cancelled))
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.get(id).await? {
            Some(_) => Ok(false),
            None => Err(CheckpointError::NotFound(id)),
        }
    }
}

// =============================================================================
// In-memory
// =============================================================================

/// In-memory implementation of CheckpointStore
///
/// Loses every instance on restart. Used when no database is configured.
#[derive(Default)]
pub struct InMemoryCheckpointStore {
    entries: Mutex<HashMap<Uuid, Entry>>,
}

struct Entry {
    instance: MonitorInstance,
    lease_expires_at: Option<DateTime<Utc>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn create_or_get(
        &self,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<Started, CheckpointError> {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.values().find(|e| {
            e.instance.status == MonitorStatus::Polling
                && e.instance.checkpoint.job_id == checkpoint.job_id
        }) {
            return Ok(Started {
                instance: entry.instance.clone(),
                created: false,
            });
        }

        let now = Utc::now();
        let instance = MonitorInstance {
            id: Uuid::new_v4(),
            checkpoint,
            status: MonitorStatus::Polling,
            wake_at,
            polls: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        entries.insert(
            instance.id,
            Entry {
                instance: instance.clone(),
                lease_expires_at: None,
            },
        );

        Ok(Started {
            instance,
            created: true,
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<MonitorInstance>, CheckpointError> {
        let entries = self.entries.lock().await;
        Ok(entries.get(&id).map(|e| e.instance.clone()))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease: chrono::Duration,
        limit: usize,
    ) -> Result<Vec<MonitorInstance>, CheckpointError> {
        let mut entries = self.entries.lock().await;

        let mut due: Vec<&mut Entry> = entries
            .values_mut()
            .filter(|e| {
                e.instance.status == MonitorStatus::Polling
                    && e.instance.wake_at <= now
                    && e.lease_expires_at.is_none_or(|until| until <= now)
            })
            .collect();
        due.sort_by_key(|e| e.instance.wake_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|e| {
                e.lease_expires_at = Some(now + lease);
                e.instance.clone()
            })
            .collect())
    }

    async fn reschedule(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
        wake_at: DateTime<Utc>,
    ) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id).ok_or(CheckpointError::NotFound(id))?;

        if entry.instance.status != MonitorStatus::Polling {
            return Ok(false);
        }

        entry.instance.checkpoint = checkpoint;
        entry.instance.wake_at = wake_at;
        entry.instance.polls += 1;
        entry.instance.updated_at = Utc::now();
        entry.lease_expires_at = None;

        Ok(true)
    }

    async fn complete(
        &self,
        id: Uuid,
        checkpoint: OrchestrationCheckpoint,
    ) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id).ok_or(CheckpointError::NotFound(id))?;

        if entry.instance.status != MonitorStatus::Polling {
            return Ok(false);
        }

        let now = Utc::now();
        entry.instance.checkpoint = checkpoint;
        entry.instance.status = MonitorStatus::Done;
        entry.instance.polls += 1;
        entry.instance.updated_at = now;
        entry.instance.completed_at = Some(now);
        entry.lease_expires_at = None;

        Ok(true)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, CheckpointError> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id).ok_or(CheckpointError::NotFound(id))?;

        if entry.instance.status != MonitorStatus::Polling {
            return Ok(false);
        }

        let now = Utc::now();
        entry.instance.status = MonitorStatus::Cancelled;
        entry.instance.updated_at = now;
        entry.instance.completed_at = Some(now);
        entry.lease_expires_at = None;

        Ok(true)
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: MonitorStatus) -> &'static str {
    match status {
        MonitorStatus::Polling => "Polling",
        MonitorStatus::Done => "Done",
        MonitorStatus::Cancelled => "Cancelled",
    }
}

fn string_to_status(s: &str) -> Result<MonitorStatus, CheckpointError> {
    match s {
        "Polling" => Ok(MonitorStatus::Polling),
        "Done" => Ok(MonitorStatus::Done),
        "Cancelled" => Ok(MonitorStatus::Cancelled),
        other => Err(CheckpointError::Corrupt(format!("unknown status '{}'", other))),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: Uuid,
    job_id: String,
    last_polled_at: Option<DateTime<Utc>>,
    status: String,
    wake_at: DateTime<Utc>,
    polls: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<InstanceRow> for MonitorInstance {
    type Error = CheckpointError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(MonitorInstance {
            id: row.id,
            checkpoint: OrchestrationCheckpoint {
                job_id: row.job_id,
                last_polled_at: row.last_polled_at,
            },
            status: string_to_status(&row.status)?,
            wake_at: row.wake_at,
            polls: u64::try_from(row.polls)
                .map_err(|_| CheckpointError::Corrupt(format!("negative poll count for {}", row.id)))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}
