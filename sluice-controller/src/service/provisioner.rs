//! Pool and Job Provisioning
//!
//! Idempotent create-if-absent of the compute pool and job. An
//! "already exists" answer from the service counts as success.

use sluice_core::domain::application::ApplicationDescriptor;
use sluice_core::domain::pool::{
    ApplicationPackageReference, ImageReference, JobDescriptor, NodePlatform, OnAllTasksComplete,
    PoolDescriptor, PoolScaling, Provisioned,
};
use sluice_core::domain::settings::{PoolSettings, ScaleSettings};

use crate::repository::compute::{ComputeError, ComputeService};

/// Sampling window of the pending-task metric, in seconds
pub const AUTOSCALE_SAMPLE_SECONDS: u32 = 180;

/// Minimum percentage of available samples before the average is trusted
pub const AUTOSCALE_SAMPLE_THRESHOLD_PERCENT: u32 = 70;

pub struct PoolJobProvisioner<'a> {
    compute: &'a dyn ComputeService,
}

impl<'a> PoolJobProvisioner<'a> {
    pub fn new(compute: &'a dyn ComputeService) -> Self {
        Self { compute }
    }

    pub async fn ensure_pool(&self, pool: &PoolDescriptor) -> Result<Provisioned, ComputeError> {
        tracing::info!("Creating pool {}...", pool.id);

        let outcome = self.compute.create_pool(pool).await?;
        match outcome {
            Provisioned::Created => tracing::info!("Pool {} created", pool.id),
            Provisioned::AlreadyExists => tracing::info!("Pool {} already exists", pool.id),
        }

        Ok(outcome)
    }

    pub async fn ensure_job(&self, job: &JobDescriptor) -> Result<Provisioned, ComputeError> {
        tracing::info!("Creating job {} on pool {}...", job.id, job.pool_id);

        let outcome = self.compute.create_job(job).await?;
        match outcome {
            Provisioned::Created => tracing::info!("Job {} created", job.id),
            Provisioned::AlreadyExists => tracing::info!("Job {} already exists", job.id),
        }

        Ok(outcome)
    }
}

/// Pool descriptor for validated settings, with every application attached
pub fn pool_descriptor(settings: &PoolSettings, applications: &[ApplicationDescriptor]) -> PoolDescriptor {
    let scaling = match settings.scale {
        ScaleSettings::Fixed { target_nodes } => PoolScaling::Fixed {
            target_dedicated_nodes: target_nodes,
        },
        ScaleSettings::Autoscale {
            starting_nodes,
            min_nodes,
            max_nodes,
            evaluation_interval_minutes,
        } => PoolScaling::Autoscale {
            formula: autoscale_formula(starting_nodes, min_nodes, max_nodes),
            evaluation_interval_secs: u64::from(evaluation_interval_minutes) * 60,
        },
    };

    let (image, node_agent_sku_id) = node_image(settings.platform);

    PoolDescriptor {
        id: settings.pool_id.clone(),
        vm_size: settings.vm_size.clone(),
        platform: settings.platform,
        image,
        node_agent_sku_id,
        scaling,
        application_packages: applications
            .iter()
            .map(|app| ApplicationPackageReference {
                application_id: app.id.clone(),
                version: app.version.clone(),
            })
            .collect(),
    }
}

pub fn job_descriptor(settings: &PoolSettings) -> JobDescriptor {
    JobDescriptor {
        id: settings.job_id.clone(),
        pool_id: settings.pool_id.clone(),
        on_all_tasks_complete: if settings.delete_job_on_completion {
            OnAllTasksComplete::TerminateJob
        } else {
            OnAllTasksComplete::NoAction
        },
    }
}

/// Scales on the pending-task average over the sample window, clamped to
/// `[min, max]`; falls back to `starting` while too few samples exist
pub fn autoscale_formula(starting: u32, min: u32, max: u32) -> String {
    let window = AUTOSCALE_SAMPLE_SECONDS;
    let threshold = AUTOSCALE_SAMPLE_THRESHOLD_PERCENT;

    [
        format!("startingNumberOfVMs = {};", starting),
        format!("minNumberOfVMs = {};", min),
        format!("maxNumberOfVMs = {};", max),
        format!("pendingTaskSamplePercent = $PendingTasks.GetSamplePercent({} * TimeInterval_Second);", window),
        format!(
            "pendingTaskSamples = pendingTaskSamplePercent < {} ? startingNumberOfVMs : avg($PendingTasks.GetSample({} * TimeInterval_Second));",
            threshold, window
        ),
        "$TargetDedicatedNodes = max(minNumberOfVMs, min(maxNumberOfVMs, pendingTaskSamples));".to_string(),
        "$NodeDeallocationOption = taskcompletion;".to_string(),
    ]
    .join("\n")
}

/// Marketplace image and node agent for a platform
pub fn node_image(platform: NodePlatform) -> (ImageReference, String) {
    let image = |publisher: &str, offer: &str, sku: &str| ImageReference {
        publisher: publisher.to_string(),
        offer: offer.to_string(),
        sku: sku.to_string(),
        version: "latest".to_string(),
    };

    match platform {
        NodePlatform::Windows => (
            image("MicrosoftWindowsServer", "WindowsServer", "2019-datacenter-smalldisk"),
            "batch.node.windows amd64".to_string(),
        ),
        NodePlatform::Linux => (
            image("canonical", "0001-com-ubuntu-server-focal", "20_04-lts"),
            "batch.node.ubuntu 20.04".to_string(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::fakes::FakeCompute;

    fn settings(scale: ScaleSettings) -> PoolSettings {
        PoolSettings {
            pool_id: "pool-1".to_string(),
            job_id: "job-1".to_string(),
            vm_size: "standard_d1_v2".to_string(),
            platform: NodePlatform::Windows,
            scale,
            delete_job_on_completion: false,
        }
    }

    fn apps() -> Vec<ApplicationDescriptor> {
        vec![
            ApplicationDescriptor {
                id: "app1".to_string(),
                version: "1.0".to_string(),
                executable: "one.exe".to_string(),
            },
            ApplicationDescriptor {
                id: "app2".to_string(),
                version: "2.1".to_string(),
                executable: "two.exe".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_ensure_twice_never_errors() {
        let compute = FakeCompute::default();
        let provisioner = PoolJobProvisioner::new(&compute);
        let settings = settings(ScaleSettings::Fixed { target_nodes: 2 });
        let pool = pool_descriptor(&settings, &apps());
        let job = job_descriptor(&settings);

        assert_eq!(provisioner.ensure_pool(&pool).await.unwrap(), Provisioned::Created);
        assert_eq!(provisioner.ensure_pool(&pool).await.unwrap(), Provisioned::AlreadyExists);
        assert_eq!(provisioner.ensure_job(&job).await.unwrap(), Provisioned::Created);
        assert_eq!(provisioner.ensure_job(&job).await.unwrap(), Provisioned::AlreadyExists);
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let compute = FakeCompute {
            fail_pool: true,
            ..FakeCompute::default()
        };
        let provisioner = PoolJobProvisioner::new(&compute);
        let pool = pool_descriptor(&settings(ScaleSettings::Fixed { target_nodes: 1 }), &[]);

        let err = provisioner.ensure_pool(&pool).await.unwrap_err();
        assert!(matches!(err, ComputeError::Api { status: 403, .. }));
    }

    #[test]
    fn test_pool_attaches_every_application() {
        let pool = pool_descriptor(&settings(ScaleSettings::Fixed { target_nodes: 3 }), &apps());

        assert_eq!(pool.application_packages.len(), 2);
        assert_eq!(pool.application_packages[1].application_id, "app2");
        assert_eq!(pool.application_packages[1].version, "2.1");
        assert_eq!(pool.scaling, PoolScaling::Fixed { target_dedicated_nodes: 3 });
        assert_eq!(pool.node_agent_sku_id, "batch.node.windows amd64");
        assert_eq!(pool.image.sku, "2019-datacenter-smalldisk");
    }

    #[test]
    fn test_autoscale_pool() {
        let pool = pool_descriptor(
            &settings(ScaleSettings::Autoscale {
                starting_nodes: 1,
                min_nodes: 0,
                max_nodes: 10,
                evaluation_interval_minutes: 5,
            }),
            &apps(),
        );

        match pool.scaling {
            PoolScaling::Autoscale {
                formula,
                evaluation_interval_secs,
            } => {
                assert_eq!(evaluation_interval_secs, 300);
                assert!(formula.contains("startingNumberOfVMs = 1;"));
                assert!(formula.contains("minNumberOfVMs = 0;"));
                assert!(formula.contains("maxNumberOfVMs = 10;"));
            }
            other => panic!("expected autoscale, got {:?}", other),
        }
    }

    #[test]
    fn test_autoscale_formula_text() {
        let formula = autoscale_formula(2, 1, 4);
        let lines: Vec<&str> = formula.lines().collect();

        assert_eq!(lines.len(), 7);
        assert_eq!(
            lines[3],
            "pendingTaskSamplePercent = $PendingTasks.GetSamplePercent(180 * TimeInterval_Second);"
        );
        assert_eq!(
            lines[4],
            "pendingTaskSamples = pendingTaskSamplePercent < 70 ? startingNumberOfVMs : avg($PendingTasks.GetSample(180 * TimeInterval_Second));"
        );
        assert_eq!(lines[6], "$NodeDeallocationOption = taskcompletion;");
    }

    #[test]
    fn test_job_completion_policy() {
        let mut settings = settings(ScaleSettings::Fixed { target_nodes: 1 });
        assert_eq!(
            job_descriptor(&settings).on_all_tasks_complete,
            OnAllTasksComplete::NoAction
        );

        settings.delete_job_on_completion = true;
        let job = job_descriptor(&settings);
        assert_eq!(job.on_all_tasks_complete, OnAllTasksComplete::TerminateJob);
        assert_eq!(job.pool_id, "pool-1");
    }

    #[test]
    fn test_linux_image() {
        let (image, agent) = node_image(NodePlatform::Linux);
        assert_eq!(image.publisher, "canonical");
        assert_eq!(agent, "batch.node.ubuntu 20.04");
    }
}
