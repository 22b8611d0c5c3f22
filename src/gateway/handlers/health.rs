//! Health check handler

use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode};
use chrono::Utc;
use utoipa::ToSchema;

use super::super::state::AppState;
use super::super::types::ApiResponse;

/// Health check response data
#[derive(serde::Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the agent cannot be reached
    #[schema(example = "ok")]
    pub status: String,
    /// `None` when no HTTP agent is configured
    pub agent_reachable: Option<bool>,
    pub agent_version: Option<String>,
    /// Build commit
    #[schema(example = "a1b2c3d")]
    pub build: String,
    pub uptime_ms: u64,
    /// Server timestamp in milliseconds
    #[schema(example = 1703494800000_i64)]
    pub timestamp_ms: i64,
}

/// Health check endpoint
///
/// Always 200 while the process serves requests: snapshots stay available
/// (stale) when the agent is down, so an unreachable agent only degrades.
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Service up", body = HealthResponse, content_type = "application/json")
    ),
    tag = "System"
)]
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ApiResponse<HealthResponse>>) {
    let (agent_reachable, agent_version) = match &state.agent {
        Some(agent) => match agent.status().await {
            Ok(status) => (Some(true), status.version),
            Err(e) => {
                tracing::warn!(error = %e, "[HEALTH] Agent status check failed");
                (Some(false), None)
            }
        },
        None => (None, None),
    };

    let status = if agent_reachable == Some(false) {
        "degraded"
    } else {
        "ok"
    };

    (
        StatusCode::OK,
        Json(ApiResponse::success(HealthResponse {
            status: status.to_string(),
            agent_reachable,
            agent_version,
            build: env!("GIT_HASH").to_string(),
            uptime_ms: state.uptime().as_millis() as u64,
            timestamp_ms: Utc::now().timestamp_millis(),
        })),
    )
}
