//! Monitor API Handlers
//!
//! HTTP endpoints for starting, inspecting and cancelling job monitors.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use sluice_core::domain::monitor::MonitorInstance;
use sluice_core::dto::monitor::{MonitorHandle, StartMonitor};
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::service::monitor_service;

/// POST /monitor/start
/// Start monitoring a job; extra body fields are ignored
pub async fn start_monitor(
    State(state): State<AppState>,
    Json(req): Json<StartMonitor>,
) -> ApiResult<(StatusCode, Json<MonitorHandle>)> {
    let started = monitor_service::start_monitor(state.checkpoints.as_ref(), req).await?;
    let id = started.instance.id;

    Ok((
        StatusCode::ACCEPTED,
        Json(MonitorHandle {
            instance_id: id,
            status_query_uri: format!("/monitor/{}", id),
            cancel_uri: format!("/monitor/{}/cancel", id),
        }),
    ))
}

/// GET /monitor/{id}
pub async fn get_monitor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MonitorInstance>> {
    tracing::debug!("Getting monitor: {}", id);

    let instance = monitor_service::get_monitor(state.checkpoints.as_ref(), id).await?;

    Ok(Json(instance))
}

/// POST /monitor/{id}/cancel
pub async fn cancel_monitor(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MonitorInstance>> {
    let instance = monitor_service::cancel_monitor(state.checkpoints.as_ref(), id).await?;

    Ok(Json(instance))
}
