//! API Module
//!
//! HTTP API layer for the controller.
//! Each submodule handles endpoints for a specific domain.

pub mod error;
pub mod health;
pub mod monitor;
pub mod submission;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::repository::checkpoint::CheckpointStore;
use crate::service::submission::SubmissionCoordinator;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionCoordinator>,
    pub checkpoints: Arc<dyn CheckpointStore>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Submission endpoints
        .route("/job/submit", post(submission::submit_job))
        // Monitor endpoints
        .route("/monitor/start", post(monitor::start_monitor))
        .route("/monitor/{id}", get(monitor::get_monitor))
        .route("/monitor/{id}/cancel", post(monitor::cancel_monitor))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
