//! Pool and job descriptors
//!
//! What the controller asks the compute service to create. Descriptors are
//! built from validated settings and never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Operating system family of the pool nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodePlatform {
    #[default]
    Windows,
    Linux,
}

impl std::fmt::Display for NodePlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodePlatform::Windows => write!(f, "windows"),
            NodePlatform::Linux => write!(f, "linux"),
        }
    }
}

/// Marketplace image the pool nodes boot from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

/// Package installed on every node of a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationPackageReference {
    pub application_id: String,
    pub version: String,
}

/// How the pool decides its node count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PoolScaling {
    Fixed {
        target_dedicated_nodes: u32,
    },
    Autoscale {
        formula: String,
        evaluation_interval_secs: u64,
    },
}

/// A compute pool to create if absent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolDescriptor {
    pub id: String,
    pub vm_size: String,
    pub platform: NodePlatform,
    pub image: ImageReference,
    pub node_agent_sku_id: String,
    pub scaling: PoolScaling,
    pub application_packages: Vec<ApplicationPackageReference>,
}

/// What the service does with a job once all its tasks finish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnAllTasksComplete {
    #[default]
    NoAction,
    TerminateJob,
}

/// A job to create if absent, bound to one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub pool_id: String,
    pub on_all_tasks_complete: OnAllTasksComplete,
}

/// Outcome of an idempotent create-if-absent call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provisioned {
    Created,
    AlreadyExists,
}
