//! API Error Handling
//!
//! Unified error types and conversion for API responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::repository::checkpoint::CheckpointError;
use crate::service::monitor::MonitorError;
use crate::service::submission::SubmitError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// A collaborator (blob or compute service) failed
    Upstream(String),
    CheckpointError(CheckpointError),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Upstream(msg) => {
                tracing::error!("Upstream error: {}", msg);
                (StatusCode::BAD_GATEWAY, msg)
            }
            ApiError::CheckpointError(err) => {
                tracing::error!("Checkpoint store error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        if err.is_precondition() {
            ApiError::BadRequest(err.to_string())
        } else if err.signing_error().is_some() {
            ApiError::InternalError(err.to_string())
        } else {
            ApiError::Upstream(err.to_string())
        }
    }
}

impl From<MonitorError> for ApiError {
    fn from(err: MonitorError) -> Self {
        match err {
            MonitorError::Invalid(msg) => ApiError::BadRequest(msg),
            MonitorError::NotFound(id) => {
                ApiError::NotFound(format!("Monitor instance {} not found", id))
            }
            err @ MonitorError::AlreadyFinished { .. } => ApiError::Conflict(err.to_string()),
            MonitorError::Store(err) => ApiError::CheckpointError(err),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::compute::ComputeError;
    use crate::repository::object_store::StoreError;
    use crate::service::signer::SigningError;
    use sluice_core::domain::monitor::MonitorStatus;
    use uuid::Uuid;

    fn status(err: impl Into<ApiError>) -> StatusCode {
        err.into().into_response().status()
    }

    #[test]
    fn test_submission_error_statuses() {
        assert_eq!(
            status(SubmitError::InputContainerMissing("input".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(SubmitError::Invalid("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(SubmitError::Compute(ComputeError::Parse("eof".to_string()))),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status(SubmitError::Store(StoreError::Signing(SigningError::InvalidTtl))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_monitor_error_statuses() {
        assert_eq!(
            status(MonitorError::NotFound(Uuid::new_v4())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(MonitorError::AlreadyFinished {
                id: Uuid::new_v4(),
                status: MonitorStatus::Done,
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status(MonitorError::Invalid("job_id is required".to_string())),
            StatusCode::BAD_REQUEST
        );
    }
}
