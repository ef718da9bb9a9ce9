//! In-process collaborators for service tests

use async_trait::async_trait;
use chrono::Utc;
use sluice_core::domain::job::JobState;
use sluice_core::domain::pool::{JobDescriptor, PoolDescriptor, Provisioned};
use sluice_core::domain::signing::{Permissions, ResourceRef, SignedUrl};
use sluice_core::domain::task::TaskSpec;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::repository::compute::{ComputeConnector, ComputeError, ComputeService};
use crate::repository::object_store::{ObjectPage, ObjectStore, StoreError};

pub fn signed(resource: &ResourceRef, permissions: Permissions, ttl: Duration) -> SignedUrl {
    let now = Utc::now();
    SignedUrl {
        url: format!(
            "https://store.test/{}?sp={}&sig=fake",
            resource.path(),
            permissions.as_signed_string()
        ),
        permissions,
        starts_at: now,
        expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
    }
}

/// Object store over fixed container contents, paged by offset cursors
#[derive(Default)]
pub struct FakeObjectStore {
    pub containers: Mutex<HashMap<String, Vec<String>>>,
    pub created: Mutex<Vec<String>>,
    pub page_requests: AtomicUsize,
    /// Fail the page request with this index (0-based)
    pub fail_page: Option<usize>,
    /// Fail signing of this object name
    pub fail_sign: Option<String>,
}

impl FakeObjectStore {
    pub fn with_container(self, name: &str, objects: &[&str]) -> Self {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            objects.iter().map(|o| o.to_string()).collect(),
        );
        self
    }

    pub fn page_requests(&self) -> usize {
        self.page_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn container_exists(&self, container: &str) -> Result<bool, StoreError> {
        Ok(self.containers.lock().unwrap().contains_key(container))
    }

    async fn create_container_if_absent(&self, container: &str) -> Result<Provisioned, StoreError> {
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(container) {
            return Ok(Provisioned::AlreadyExists);
        }
        containers.insert(container.to_string(), Vec::new());
        self.created.lock().unwrap().push(container.to_string());
        Ok(Provisioned::Created)
    }

    async fn list_page(
        &self,
        container: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<ObjectPage, StoreError> {
        let index = self.page_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_page == Some(index) {
            return Err(StoreError::Api {
                status: 503,
                message: "listing unavailable".to_string(),
            });
        }

        let containers = self.containers.lock().unwrap();
        let objects = containers.get(container).ok_or_else(|| StoreError::Api {
            status: 404,
            message: format!("container {} not found", container),
        })?;

        let start: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + page_size).min(objects.len());

        Ok(ObjectPage {
            names: objects[start..end].to_vec(),
            next_cursor: (end < objects.len()).then(|| end.to_string()),
        })
    }

    fn sign(
        &self,
        resource: &ResourceRef,
        permissions: Permissions,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError> {
        if let ResourceRef::Object { name, .. } = resource {
            if self.fail_sign.as_deref() == Some(name.as_str()) {
                return Err(StoreError::Parse(format!("cannot sign {}", name)));
            }
        }
        Ok(signed(resource, permissions, ttl))
    }
}

/// Compute service that remembers what was created and replays job states
#[derive(Default)]
pub struct FakeCompute {
    pub pools: Mutex<HashSet<String>>,
    pub jobs: Mutex<HashSet<String>>,
    pub pool_requests: Mutex<Vec<PoolDescriptor>>,
    pub job_requests: Mutex<Vec<JobDescriptor>>,
    pub submitted: Mutex<Vec<(String, Vec<TaskSpec>)>>,
    /// States returned by successive status queries; the last one repeats
    pub states: Mutex<VecDeque<Result<JobState, String>>>,
    pub status_queries: AtomicUsize,
    pub fail_pool: bool,
}

impl FakeCompute {
    pub fn with_states(states: Vec<Result<JobState, String>>) -> Self {
        Self {
            states: Mutex::new(states.into()),
            ..Self::default()
        }
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ComputeService for FakeCompute {
    async fn create_pool(&self, pool: &PoolDescriptor) -> Result<Provisioned, ComputeError> {
        if self.fail_pool {
            return Err(ComputeError::Api {
                status: 403,
                code: "AuthorizationFailure".to_string(),
                message: "not allowed".to_string(),
            });
        }
        self.pool_requests.lock().unwrap().push(pool.clone());
        if self.pools.lock().unwrap().insert(pool.id.clone()) {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn create_job(&self, job: &JobDescriptor) -> Result<Provisioned, ComputeError> {
        self.job_requests.lock().unwrap().push(job.clone());
        if self.jobs.lock().unwrap().insert(job.id.clone()) {
            Ok(Provisioned::Created)
        } else {
            Ok(Provisioned::AlreadyExists)
        }
    }

    async fn submit_tasks(&self, job_id: &str, tasks: &[TaskSpec]) -> Result<(), ComputeError> {
        self.submitted
            .lock()
            .unwrap()
            .push((job_id.to_string(), tasks.to_vec()));
        Ok(())
    }

    async fn get_job_state(&self, _job_id: &str) -> Result<JobState, ComputeError> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut states = self.states.lock().unwrap();
        let next = if states.len() > 1 {
            states.pop_front()
        } else {
            states.front().cloned()
        };

        match next {
            Some(Ok(state)) => Ok(state),
            Some(Err(message)) => Err(ComputeError::Parse(message)),
            None => Ok(JobState::Active),
        }
    }
}

/// Hands out the same fake compute service on every connect
pub struct FakeConnector {
    pub compute: Arc<FakeCompute>,
    pub connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(compute: FakeCompute) -> Self {
        Self {
            compute: Arc::new(compute),
            connects: AtomicUsize::new(0),
        }
    }
}

impl ComputeConnector for FakeConnector {
    fn connect(&self) -> Result<Arc<dyn ComputeService>, ComputeError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.compute.clone())
    }
}
