//! Monitor API endpoints

use crate::ControllerClient;
use crate::error::Result;
use sluice_core::domain::monitor::MonitorInstance;
use sluice_core::dto::monitor::{MonitorHandle, StartMonitor};
use uuid::Uuid;

impl ControllerClient {
    /// Start monitoring a job
    ///
    /// Starting a job that is already monitored returns the existing instance.
    pub async fn start_monitor(&self, req: &StartMonitor) -> Result<MonitorHandle> {
        let url = format!("{}/monitor/start", self.base_url);
        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }

    /// Get a monitor instance by ID
    pub async fn get_monitor(&self, instance_id: Uuid) -> Result<MonitorInstance> {
        let url = format!("{}/monitor/{}", self.base_url, instance_id);
        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a polling monitor instance
    ///
    /// Fails with a 409 API error if the instance already finished.
    pub async fn cancel_monitor(&self, instance_id: Uuid) -> Result<MonitorInstance> {
        let url = format!("{}/monitor/{}/cancel", self.base_url, instance_id);
        let response = self.client.post(&url).send().await?;

        self.handle_response(response).await
    }
}
