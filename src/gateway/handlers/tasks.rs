//! Background task handlers

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State},
};

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, StartTaskRequest, ok};
use crate::exchange::{BackgroundTask, TaskId};

fn parse_task_id(id: &str) -> Result<TaskId, ApiError> {
    id.parse::<TaskId>()
        .map_err(|e| ApiError::bad_request(format!("Invalid task id {}: {}", id, e)))
}

/// Start a background operation
///
/// POST /api/v1/tasks
#[utoipa::path(
    post,
    path = "/api/v1/tasks",
    request_body(content = StartTaskRequest, content_type = "application/json"),
    responses(
        (status = 200, description = "Task started", body = BackgroundTask, content_type = "application/json"),
        (status = 400, description = "Invalid operation or timeout")
    ),
    tag = "Tasks"
)]
pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartTaskRequest>,
) -> ApiResult<BackgroundTask> {
    let timeout = match req.timeout_ms {
        Some(0) => return ApiError::bad_request("timeout_ms must be > 0").into_err(),
        Some(ms) if Duration::from_millis(ms) > state.max_task_timeout => {
            return ApiError::bad_request(format!(
                "timeout_ms exceeds maximum of {}",
                state.max_task_timeout.as_millis()
            ))
            .into_err();
        }
        Some(ms) => Some(Duration::from_millis(ms)),
        None => None,
    };

    let task = state
        .orchestrator
        .start_background_task(req.operation, timeout)?;
    ok(task)
}

/// List tracked tasks, oldest first
///
/// GET /api/v1/tasks
#[utoipa::path(
    get,
    path = "/api/v1/tasks",
    responses(
        (status = 200, description = "All tracked tasks", body = Vec<BackgroundTask>, content_type = "application/json")
    ),
    tag = "Tasks"
)]
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Vec<BackgroundTask>> {
    ok(state.orchestrator.list_background_tasks())
}

/// GET /api/v1/tasks/{id}
#[utoipa::path(
    get,
    path = "/api/v1/tasks/{id}",
    params(("id" = String, Path, description = "Task id (ULID)")),
    responses(
        (status = 200, description = "Task", body = BackgroundTask, content_type = "application/json"),
        (status = 404, description = "Unknown task")
    ),
    tag = "Tasks"
)]
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<BackgroundTask> {
    let id = parse_task_id(&id)?;
    ok(state.orchestrator.get_background_task(&id)?)
}

/// Dismiss a task; a running one is cancelled
///
/// DELETE /api/v1/tasks/{id}
#[utoipa::path(
    delete,
    path = "/api/v1/tasks/{id}",
    params(("id" = String, Path, description = "Task id (ULID)")),
    responses(
        (status = 200, description = "Dismissed task as last seen", body = BackgroundTask, content_type = "application/json"),
        (status = 404, description = "Unknown task")
    ),
    tag = "Tasks"
)]
pub async fn dismiss_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<BackgroundTask> {
    let id = parse_task_id(&id)?;
    ok(state.orchestrator.dismiss_background_task(&id)?)
}
