//! Submission API endpoints

use crate::ControllerClient;
use crate::error::Result;
use sluice_core::dto::submission::{JobSubmissionResult, SubmitJob};

impl ControllerClient {
    /// Submit a batch: provision pool and job, then one task per input object
    /// and application
    ///
    /// # Returns
    /// The pool and job ids with every submitted task id
    pub async fn submit_job(&self, req: &SubmitJob) -> Result<JobSubmissionResult> {
        let url = format!("{}/job/submit", self.base_url);
        tracing::debug!("Submitting job {} to {}", req.pool.job_id, url);

        let response = self.client.post(&url).json(req).send().await?;

        self.handle_response(response).await
    }
}
