//! Submission API Handlers

use axum::{Json, extract::State};
use sluice_core::dto::submission::{JobSubmissionResult, SubmitJob};

use crate::api::AppState;
use crate::api::error::ApiResult;

/// POST /job/submit
/// Provision the pool and job, then submit one task per input object and application
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJob>,
) -> ApiResult<Json<JobSubmissionResult>> {
    tracing::info!(
        "Submitting job {} on pool {} ({} application(s))",
        req.pool.job_id,
        req.pool.pool_id,
        req.applications.len()
    );

    let result = state.submissions.submit(req).await?;

    Ok(Json(result))
}
