//! Submission Service
//!
//! Runs one batch submission end to end: validate, check storage, provision
//! compute, enumerate inputs, plan and submit tasks.

use chrono::Utc;
use futures::TryStreamExt;
use sluice_core::domain::settings::{PoolSettings, ScaleSettings, StorageSettings};
use sluice_core::domain::signing::{Permissions, ResourceRef};
use sluice_core::domain::work_item::WorkItem;
use sluice_core::dto::submission::{JobSubmissionResult, SubmitJob};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::repository::compute::{ComputeConnector, ComputeError};
use crate::repository::object_store::{ObjectStore, StoreError};
use crate::service::enumerator::{DEFAULT_PAGE_SIZE, EnumerationError, WorkItemEnumerator};
use crate::service::planner::{self, PlanContext};
use crate::service::provisioner::{self, PoolJobProvisioner};
use crate::service::signer::{DEFAULT_SIGNATURE_TTL, SigningError};

/// Longest pool or job id the compute service accepts
pub const MAX_ID_LENGTH: usize = 64;

/// Autoscale evaluation bounds accepted by the compute service, in minutes
const MIN_EVALUATION_MINUTES: u32 = 5;
const MAX_EVALUATION_MINUTES: u32 = 7 * 24 * 60;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("input container '{0}' does not exist")]
    InputContainerMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Compute(#[from] ComputeError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),
}

impl SubmitError {
    /// Rejected before any remote mutation
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            SubmitError::Invalid(_) | SubmitError::InputContainerMissing(_)
        )
    }

    /// Failed because the ambient credential could not sign a request or URL
    pub fn signing_error(&self) -> Option<&SigningError> {
        match self {
            SubmitError::Store(StoreError::Signing(e))
            | SubmitError::Compute(ComputeError::Signing(e))
            | SubmitError::Enumeration(EnumerationError::Signing {
                source: StoreError::Signing(e),
                ..
            })
            | SubmitError::Enumeration(EnumerationError::Page(StoreError::Signing(e))) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubmissionOptions {
    /// Lifetime of every URL handed to tasks
    pub signature_ttl: Duration,

    /// Listing page size
    pub page_size: usize,
}

impl Default for SubmissionOptions {
    fn default() -> Self {
        Self {
            signature_ttl: DEFAULT_SIGNATURE_TTL,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

pub struct SubmissionCoordinator {
    store: Arc<dyn ObjectStore>,
    connector: Arc<dyn ComputeConnector>,
    options: SubmissionOptions,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        connector: Arc<dyn ComputeConnector>,
        options: SubmissionOptions,
    ) -> Self {
        Self {
            store,
            connector,
            options,
        }
    }

    /// Submits one task per (input object, application) pair
    ///
    /// Either every task is submitted and their ids returned, or the first
    /// error is. Pools, jobs and containers created before a failure are left
    /// in place; a retry reuses them.
    pub async fn submit(&self, req: SubmitJob) -> Result<JobSubmissionResult, SubmitError> {
        validate(&req)?;

        let SubmitJob {
            pool,
            storage,
            applications,
        } = req;

        if !self.store.container_exists(&storage.input_container).await? {
            tracing::error!("Input container {} does not exist", storage.input_container);
            return Err(SubmitError::InputContainerMissing(storage.input_container));
        }

        let outcome = self
            .store
            .create_container_if_absent(&storage.output_container)
            .await?;
        tracing::info!(
            "Output container {} ready ({:?})",
            storage.output_container,
            outcome
        );

        let compute = self.connector.connect()?;
        let provisioner = PoolJobProvisioner::new(compute.as_ref());
        provisioner
            .ensure_pool(&provisioner::pool_descriptor(&pool, &applications))
            .await?;
        provisioner
            .ensure_job(&provisioner::job_descriptor(&pool))
            .await?;

        let submitted_at = Utc::now();
        let items: Vec<WorkItem> = WorkItemEnumerator::new(Arc::clone(&self.store))
            .with_page_size(self.options.page_size)
            .with_ttl(self.options.signature_ttl)
            .enumerate(&storage.input_container)
            .try_collect()
            .await?;
        tracing::info!(
            "Found {} input object(s) in {}",
            items.len(),
            storage.input_container
        );

        let output_container = self.store.sign(
            &ResourceRef::container(&storage.output_container),
            Permissions::READ_WRITE_LIST,
            self.options.signature_ttl,
        )?;

        let tasks = planner::plan(
            &items,
            &applications,
            &PlanContext {
                job_id: &pool.job_id,
                platform: pool.platform,
                output_container: &output_container,
                submitted_at,
            },
        );

        if tasks.is_empty() {
            tracing::warn!("Nothing to submit for job {}", pool.job_id);
        } else {
            tracing::info!("Submitting {} task(s) to job {}...", tasks.len(), pool.job_id);
            compute.submit_tasks(&pool.job_id, &tasks).await?;
            tracing::info!("Submitted {} task(s) to job {}", tasks.len(), pool.job_id);
        }

        Ok(JobSubmissionResult {
            pool_id: pool.pool_id,
            job_id: pool.job_id,
            task_ids: tasks.into_iter().map(|t| t.task_id).collect(),
        })
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Rejects malformed settings before any remote call
pub fn validate(req: &SubmitJob) -> Result<(), SubmitError> {
    validate_pool(&req.pool)?;
    validate_storage(&req.storage)?;

    for app in &req.applications {
        check_id("application id", &app.id, planner::MAX_APPLICATION_ID_LENGTH)
            .map_err(SubmitError::Invalid)?;
        if app.version.trim().is_empty() {
            return Err(SubmitError::Invalid(format!(
                "application {} has no version",
                app.id
            )));
        }
        if app.executable.trim().is_empty() {
            return Err(SubmitError::Invalid(format!(
                "application {} has no executable",
                app
            )));
        }
    }

    Ok(())
}

fn validate_pool(pool: &PoolSettings) -> Result<(), SubmitError> {
    validate_id("pool id", &pool.pool_id)?;
    validate_id("job id", &pool.job_id)?;

    if pool.vm_size.trim().is_empty() {
        return Err(SubmitError::Invalid("vm size is required".to_string()));
    }

    if let ScaleSettings::Autoscale {
        starting_nodes,
        min_nodes,
        max_nodes,
        evaluation_interval_minutes,
    } = pool.scale
    {
        if min_nodes > max_nodes {
            return Err(SubmitError::Invalid(format!(
                "min nodes ({}) exceeds max nodes ({})",
                min_nodes, max_nodes
            )));
        }
        if starting_nodes < min_nodes || starting_nodes > max_nodes {
            return Err(SubmitError::Invalid(format!(
                "starting nodes ({}) must be between {} and {}",
                starting_nodes, min_nodes, max_nodes
            )));
        }
        if !(MIN_EVALUATION_MINUTES..=MAX_EVALUATION_MINUTES).contains(&evaluation_interval_minutes)
        {
            return Err(SubmitError::Invalid(format!(
                "autoscale evaluation interval must be between {} and {} minutes",
                MIN_EVALUATION_MINUTES, MAX_EVALUATION_MINUTES
            )));
        }
    }

    Ok(())
}

fn validate_storage(storage: &StorageSettings) -> Result<(), SubmitError> {
    validate_container("input container", &storage.input_container)?;
    validate_container("output container", &storage.output_container)
}

fn validate_id(what: &str, id: &str) -> Result<(), SubmitError> {
    check_id(what, id, MAX_ID_LENGTH).map_err(SubmitError::Invalid)
}

/// Letters, digits, hyphens and underscores, at most `max_length` characters
pub fn check_id(what: &str, id: &str, max_length: usize) -> Result<(), String> {
    if id.is_empty() || id.len() > max_length {
        return Err(format!("{} must be 1 to {} characters", what, max_length));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(format!(
            "{} '{}' may only contain letters, digits, hyphens and underscores",
            what, id
        ));
    }
    Ok(())
}

/// 3 to 63 lowercase letters, digits and single inner hyphens
fn validate_container(what: &str, name: &str) -> Result<(), SubmitError> {
    let valid = (3..=63).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");

    if valid {
        Ok(())
    } else {
        Err(SubmitError::Invalid(format!(
            "{} '{}' is not a valid container name",
            what, name
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fakes::{FakeCompute, FakeConnector, FakeObjectStore};
    use sluice_core::domain::application::ApplicationDescriptor;
    use sluice_core::domain::pool::{NodePlatform, OnAllTasksComplete};
    use sluice_core::domain::task::UploadCondition;

    fn request() -> SubmitJob {
        SubmitJob {
            pool: PoolSettings {
                pool_id: "pool-1".to_string(),
                job_id: "job-1".to_string(),
                vm_size: "standard_d1_v2".to_string(),
                platform: NodePlatform::Windows,
                scale: ScaleSettings::Autoscale {
                    starting_nodes: 1,
                    min_nodes: 0,
                    max_nodes: 4,
                    evaluation_interval_minutes: 5,
                },
                delete_job_on_completion: true,
            },
            storage: StorageSettings {
                input_container: "input".to_string(),
                output_container: "output".to_string(),
            },
            applications: vec![ApplicationDescriptor {
                id: "app1".to_string(),
                version: "1.0".to_string(),
                executable: "BatchProgram.exe".to_string(),
            }],
        }
    }

    struct Harness {
        store: Arc<FakeObjectStore>,
        connector: Arc<FakeConnector>,
        coordinator: SubmissionCoordinator,
    }

    fn harness(store: FakeObjectStore, compute: FakeCompute) -> Harness {
        let store = Arc::new(store);
        let connector = Arc::new(FakeConnector::new(compute));
        let coordinator = SubmissionCoordinator::new(
            store.clone(),
            connector.clone(),
            SubmissionOptions::default(),
        );
        Harness {
            store,
            connector,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_two_objects_one_application() {
        let h = harness(
            FakeObjectStore::default().with_container("input", &["a.txt", "b.txt"]),
            FakeCompute::default(),
        );

        let result = h.coordinator.submit(request()).await.unwrap();

        assert_eq!(result.pool_id, "pool-1");
        assert_eq!(result.job_id, "job-1");
        assert_eq!(result.task_ids.len(), 2);

        let submitted = h.connector.compute.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        let (job_id, tasks) = &submitted[0];
        assert_eq!(job_id, "job-1");
        assert_eq!(
            tasks.iter().map(|t| &t.task_id).collect::<Vec<_>>(),
            result.task_ids.iter().collect::<Vec<_>>()
        );

        for (task, name) in tasks.iter().zip(["a.txt", "b.txt"]) {
            assert_eq!(task.input_bindings.len(), 1);
            assert_eq!(task.input_bindings[0].relative_name, name);

            let conditions: Vec<_> = task
                .output_bindings
                .iter()
                .map(|b| b.upload_condition)
                .collect();
            assert_eq!(
                conditions,
                vec![UploadCondition::OnSuccess, UploadCondition::OnFailure]
            );
            assert_eq!(
                task.output_bindings[0].destination.permissions,
                Permissions::READ_WRITE_LIST
            );
        }

        let jobs = h.connector.compute.job_requests.lock().unwrap();
        assert_eq!(jobs[0].on_all_tasks_complete, OnAllTasksComplete::TerminateJob);
        assert_eq!(*h.store.created.lock().unwrap(), vec!["output".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_input_container_aborts_before_mutation() {
        let h = harness(FakeObjectStore::default(), FakeCompute::default());

        let err = h.coordinator.submit(request()).await.unwrap_err();

        assert!(matches!(err, SubmitError::InputContainerMissing(ref c) if c == "input"));
        assert!(err.is_precondition());
        assert!(h.store.created.lock().unwrap().is_empty());
        assert!(h.connector.compute.pool_requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_settings_make_no_remote_call() {
        let h = harness(
            FakeObjectStore::default().with_container("input", &["a.txt"]),
            FakeCompute::default(),
        );
        let mut req = request();
        req.pool.scale = ScaleSettings::Autoscale {
            starting_nodes: 9,
            min_nodes: 0,
            max_nodes: 4,
            evaluation_interval_minutes: 5,
        };

        let err = h.coordinator.submit(req).await.unwrap_err();

        assert!(matches!(err, SubmitError::Invalid(_)));
        assert_eq!(
            h.connector.connects.load(std::sync::atomic::Ordering::SeqCst),
            0
        );
        assert!(h.store.created.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provisioning_error_is_fatal() {
        let h = harness(
            FakeObjectStore::default().with_container("input", &["a.txt"]),
            FakeCompute {
                fail_pool: true,
                ..FakeCompute::default()
            },
        );

        let err = h.coordinator.submit(request()).await.unwrap_err();

        assert!(matches!(err, SubmitError::Compute(ComputeError::Api { .. })));
        assert!(!err.is_precondition());
        assert!(h.connector.compute.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resubmission_reuses_pool_and_job() {
        let h = harness(
            FakeObjectStore::default().with_container("input", &["a.txt"]),
            FakeCompute::default(),
        );

        h.coordinator.submit(request()).await.unwrap();
        let again = h.coordinator.submit(request()).await.unwrap();

        assert_eq!(again.task_ids.len(), 1);
        assert_eq!(h.connector.compute.submitted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_enumeration_failure_submits_nothing() {
        let mut store = FakeObjectStore::default().with_container("input", &["a.txt"]);
        store.fail_page = Some(0);
        let h = harness(store, FakeCompute::default());

        let err = h.coordinator.submit(request()).await.unwrap_err();

        assert!(matches!(err, SubmitError::Enumeration(EnumerationError::Page(_))));
        assert!(h.connector.compute.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_input_container() {
        let h = harness(
            FakeObjectStore::default().with_container("input", &[]),
            FakeCompute::default(),
        );

        let result = h.coordinator.submit(request()).await.unwrap();

        assert!(result.task_ids.is_empty());
        assert!(h.connector.compute.submitted.lock().unwrap().is_empty());
    }

    #[test]
    fn test_identifier_rules() {
        assert!(validate_id("pool id", "pool_1-A").is_ok());
        assert!(validate_id("pool id", "").is_err());
        assert!(validate_id("pool id", "has space").is_err());
        assert!(validate_id("pool id", &"x".repeat(65)).is_err());
    }

    #[test]
    fn test_application_ids_leave_room_for_task_ids() {
        let mut req = request();
        req.applications[0].id = "a".repeat(planner::MAX_APPLICATION_ID_LENGTH + 1);
        assert!(matches!(validate(&req), Err(SubmitError::Invalid(_))));

        req.applications[0].id = "a".repeat(planner::MAX_APPLICATION_ID_LENGTH);
        assert!(validate(&req).is_ok());

        let longest = planner::task_id(&req.applications[0], 999_999_999, Utc::now());
        assert!(longest.len() <= planner::MAX_TASK_ID_LENGTH);
    }

    #[test]
    fn test_container_name_rules() {
        assert!(validate_container("c", "input-2").is_ok());
        assert!(validate_container("c", "ab").is_err());
        assert!(validate_container("c", "Input").is_err());
        assert!(validate_container("c", "-input").is_err());
        assert!(validate_container("c", "in--put").is_err());
        assert!(validate_container("c", "in_put").is_err());
    }

    #[test]
    fn test_signing_errors_are_recognised() {
        let err = SubmitError::Store(StoreError::Signing(SigningError::EmptyPermissions));
        assert!(err.signing_error().is_some());
        assert!(SubmitError::Invalid("x".to_string()).signing_error().is_none());
    }
}
