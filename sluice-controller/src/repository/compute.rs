//! Compute service repository
//!
//! Handles communication with the batch compute service:
//! - Creating pools and jobs (idempotent, "already exists" is reported, not raised)
//! - Adding tasks to a job
//! - Reading a job's state

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use sluice_core::domain::job::JobState;
use sluice_core::domain::pool::{
    JobDescriptor, OnAllTasksComplete, PoolDescriptor, PoolScaling, Provisioned,
};
use sluice_core::domain::task::TaskSpec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::service::signer::{SharedKeyCredential, SigningError};

/// Service API version sent with every request
pub const API_VERSION: &str = "2024-07-01.20.0";

/// Largest task collection the service accepts in one request
pub const MAX_TASKS_PER_REQUEST: usize = 100;

const POOL_EXISTS: &str = "PoolExists";
const JOB_EXISTS: &str = "JobExists";

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("compute service error (status {status}, code {code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("task {task_id} was rejected: {message}")]
    TaskRejected { task_id: String, message: String },

    #[error("failed to parse compute service response: {0}")]
    Parse(String),

    #[error(transparent)]
    Signing(#[from] SigningError),
}

/// Repository trait for the compute service collaborator
#[async_trait]
pub trait ComputeService: Send + Sync {
    /// Creates a pool unless one with the same id exists
    async fn create_pool(&self, pool: &PoolDescriptor) -> Result<Provisioned, ComputeError>;

    /// Creates a job unless one with the same id exists
    async fn create_job(&self, job: &JobDescriptor) -> Result<Provisioned, ComputeError>;

    /// Adds the whole task batch to a job
    async fn submit_tasks(&self, job_id: &str, tasks: &[TaskSpec]) -> Result<(), ComputeError>;

    /// Reads the job's current state
    async fn get_job_state(&self, job_id: &str) -> Result<JobState, ComputeError>;
}

/// Hands out compute service clients
///
/// Monitor activations acquire a fresh client each time and drop it before
/// suspending.
pub trait ComputeConnector: Send + Sync {
    fn connect(&self) -> Result<Arc<dyn ComputeService>, ComputeError>;
}

/// Connector producing [`HttpComputeService`] clients
#[derive(Debug, Clone)]
pub struct HttpComputeConnector {
    account_url: String,
    credential: SharedKeyCredential,
    request_timeout: Duration,
}

impl HttpComputeConnector {
    pub fn new(
        account_url: impl Into<String>,
        credential: SharedKeyCredential,
        request_timeout: Duration,
    ) -> Self {
        let account_url = account_url.into();
        Self {
            account_url: account_url.trim_end_matches('/').to_string(),
            credential,
            request_timeout,
        }
    }
}

impl ComputeConnector for HttpComputeConnector {
    fn connect(&self) -> Result<Arc<dyn ComputeService>, ComputeError> {
        let client = Client::builder().timeout(self.request_timeout).build()?;
        Ok(Arc::new(HttpComputeService::with_client(
            client,
            self.account_url.clone(),
            self.credential.clone(),
        )))
    }
}

/// HTTP implementation of ComputeService
pub struct HttpComputeService {
    client: Client,
    account_url: String,
    credential: SharedKeyCredential,
}

impl HttpComputeService {
    /// # Arguments
    /// * `client` - Configured reqwest client
    /// * `account_url` - Batch account endpoint (e.g. "https://acct.region.batch.azure.com")
    /// * `credential` - Shared key of the batch account
    pub fn with_client(client: Client, account_url: String, credential: SharedKeyCredential) -> Self {
        Self {
            client,
            account_url,
            credential,
        }
    }

    /// Builds a request carrying the shared-key authorization header
    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ComputeError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = self.credential.sign(&string_to_sign(
            &method,
            &date,
            self.credential.account(),
            path,
        ))?;

        Ok(self
            .client
            .request(method, format!("{}{}", self.account_url, path))
            .query(&[("api-version", API_VERSION)])
            .header("ocp-date", date)
            .header(
                "Authorization",
                format!("SharedKey {}:{}", self.credential.account(), signature),
            ))
    }

    /// Sends a create request, mapping `exists_code` conflicts to AlreadyExists
    async fn create<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        exists_code: &str,
    ) -> Result<Provisioned, ComputeError> {
        let response = self.request(Method::POST, path)?.json(body).send().await?;

        if response.status().is_success() {
            return Ok(Provisioned::Created);
        }

        match api_error(response).await {
            ComputeError::Api { status, code, .. }
                if status == StatusCode::CONFLICT.as_u16() && code == exists_code =>
            {
                Ok(Provisioned::AlreadyExists)
            }
            err => Err(err),
        }
    }
}

#[async_trait]
impl ComputeService for HttpComputeService {
    async fn create_pool(&self, pool: &PoolDescriptor) -> Result<Provisioned, ComputeError> {
        self.create("/pools", &PoolBody::from(pool), POOL_EXISTS).await
    }

    async fn create_job(&self, job: &JobDescriptor) -> Result<Provisioned, ComputeError> {
        self.create("/jobs", &JobBody::from(job), JOB_EXISTS).await
    }

    async fn submit_tasks(&self, job_id: &str, tasks: &[TaskSpec]) -> Result<(), ComputeError> {
        let path = format!("/jobs/{}/addtaskcollection", job_id);

        for chunk in tasks.chunks(MAX_TASKS_PER_REQUEST) {
            let body = TaskCollectionBody {
                value: chunk.iter().map(TaskBody::from).collect(),
            };

            let response = self.request(Method::POST, &path)?.json(&body).send().await?;
            if !response.status().is_success() {
                return Err(api_error(response).await);
            }

            let results = response
                .json::<TaskCollectionResult>()
                .await
                .map_err(|e| ComputeError::Parse(format!("invalid task collection result: {}", e)))?;

            if let Some(rejected) = results.value.into_iter().find(|r| r.status != "success") {
                return Err(ComputeError::TaskRejected {
                    task_id: rejected.task_id,
                    message: rejected
                        .error
                        .map(|e| e.describe())
                        .unwrap_or_else(|| rejected.status.clone()),
                });
            }
        }

        Ok(())
    }

    async fn get_job_state(&self, job_id: &str) -> Result<JobState, ComputeError> {
        let path = format!("/jobs/{}", job_id);
        let response = self.request(Method::GET, &path)?.send().await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let job = response
            .json::<JobStateBody>()
            .await
            .map_err(|e| ComputeError::Parse(format!("invalid job: {}", e)))?;

        Ok(job.state)
    }
}

fn string_to_sign(method: &Method, date: &str, account: &str, path: &str) -> String {
    format!(
        "{}\n{}\n/{}{}\napi-version:{}",
        method.as_str(),
        date,
        account,
        path,
        API_VERSION
    )
}

async fn api_error(response: reqwest::Response) -> ComputeError {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ComputeError::Api {
            status,
            code: body.code.clone().unwrap_or_else(|| "Unknown".to_string()),
            message: body.describe(),
        },
        Err(_) => ComputeError::Api {
            status,
            code: "Unknown".to_string(),
            message: text,
        },
    }
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolBody {
    id: String,
    vm_size: String,
    virtual_machine_configuration: VirtualMachineConfiguration,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_dedicated_nodes: Option<u32>,
    enable_auto_scale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_scale_formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_scale_evaluation_interval: Option<String>,
    application_package_references: Vec<PackageReferenceBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VirtualMachineConfiguration {
    image_reference: ImageReferenceBody,
    #[serde(rename = "nodeAgentSKUId")]
    node_agent_sku_id: String,
}

#[derive(Debug, Serialize)]
struct ImageReferenceBody {
    publisher: String,
    offer: String,
    sku: String,
    version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PackageReferenceBody {
    application_id: String,
    version: String,
}

impl From<&PoolDescriptor> for PoolBody {
    fn from(pool: &PoolDescriptor) -> Self {
        let (target_dedicated_nodes, auto_scale_formula, auto_scale_evaluation_interval) =
            match &pool.scaling {
                PoolScaling::Fixed {
                    target_dedicated_nodes,
                } => (Some(*target_dedicated_nodes), None, None),
                PoolScaling::Autoscale {
                    formula,
                    evaluation_interval_secs,
                } => (
                    None,
                    Some(formula.clone()),
                    Some(format!("PT{}S", evaluation_interval_secs)),
                ),
            };

        PoolBody {
            id: pool.id.clone(),
            vm_size: pool.vm_size.clone(),
            virtual_machine_configuration: VirtualMachineConfiguration {
                image_reference: ImageReferenceBody {
                    publisher: pool.image.publisher.clone(),
                    offer: pool.image.offer.clone(),
                    sku: pool.image.sku.clone(),
                    version: pool.image.version.clone(),
                },
                node_agent_sku_id: pool.node_agent_sku_id.clone(),
            },
            enable_auto_scale: auto_scale_formula.is_some(),
            target_dedicated_nodes,
            auto_scale_formula,
            auto_scale_evaluation_interval,
            application_package_references: pool
                .application_packages
                .iter()
                .map(|p| PackageReferenceBody {
                    application_id: p.application_id.clone(),
                    version: p.version.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobBody {
    id: String,
    pool_info: PoolInfoBody,
    on_all_tasks_complete: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PoolInfoBody {
    pool_id: String,
}

impl From<&JobDescriptor> for JobBody {
    fn from(job: &JobDescriptor) -> Self {
        JobBody {
            id: job.id.clone(),
            pool_info: PoolInfoBody {
                pool_id: job.pool_id.clone(),
            },
            on_all_tasks_complete: match job.on_all_tasks_complete {
                OnAllTasksComplete::NoAction => "noaction",
                OnAllTasksComplete::TerminateJob => "terminatejob",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct TaskCollectionBody {
    value: Vec<TaskBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskBody {
    id: String,
    command_line: String,
    resource_files: Vec<ResourceFileBody>,
    output_files: Vec<OutputFileBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceFileBody {
    http_url: String,
    file_path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutputFileBody {
    file_pattern: String,
    destination: OutputDestinationBody,
    upload_options: UploadOptionsBody,
}

#[derive(Debug, Serialize)]
struct OutputDestinationBody {
    container: ContainerDestinationBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContainerDestinationBody {
    container_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UploadOptionsBody {
    upload_condition: String,
}

impl From<&TaskSpec> for TaskBody {
    fn from(task: &TaskSpec) -> Self {
        TaskBody {
            id: task.task_id.clone(),
            command_line: task.command_line.clone(),
            resource_files: task
                .input_bindings
                .iter()
                .map(|item| ResourceFileBody {
                    http_url: item.source.url.clone(),
                    file_path: item.relative_name.clone(),
                })
                .collect(),
            output_files: task
                .output_bindings
                .iter()
                .map(|binding| OutputFileBody {
                    file_pattern: binding.file_pattern.clone(),
                    destination: OutputDestinationBody {
                        container: ContainerDestinationBody {
                            container_url: binding.destination.url.clone(),
                            path: binding.destination_path.clone(),
                        },
                    },
                    upload_options: UploadOptionsBody {
                        upload_condition: binding.upload_condition.to_string(),
                    },
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskCollectionResult {
    #[serde(default)]
    value: Vec<TaskAddResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskAddResult {
    status: String,
    task_id: String,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JobStateBody {
    state: JobState,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl ErrorBody {
    /// The service nests messages as `{"lang": .., "value": ..}`
    fn describe(&self) -> String {
        match &self.message {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Object(map)) => map
                .get("value")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => self.code.clone().unwrap_or_default(),
        }
    }
}
