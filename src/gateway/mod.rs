//! HTTP gateway over the orchestrator
//!
//! Thin axum layer: every handler delegates to [`crate::exchange::Orchestrator`]
//! and wraps the result in the `ApiResponse` envelope.

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use utoipa::OpenApi;

pub use state::AppState;

/// Build the complete router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(handlers::health_check))
        // Exchanges
        .route("/api/v1/exchanges/{kind}", get(handlers::get_projection))
        .route("/api/v1/exchanges/{kind}/refresh", post(handlers::refresh))
        .route(
            "/api/v1/exchanges/{kind}/{identity}/{transition}",
            post(handlers::invoke),
        )
        // Background tasks
        .route(
            "/api/v1/tasks",
            get(handlers::list_tasks).post(handlers::start_task),
        )
        .route(
            "/api/v1/tasks/{id}",
            get(handlers::get_task).delete(handlers::dismiss_task),
        )
        .with_state(state)
        // stateless, added after with_state
        .route(
            "/api-docs/openapi.json",
            get(|| async { Json(openapi::ApiDoc::openapi()) }),
        )
}

/// Start HTTP Gateway server; returns once `shutdown` is cancelled and
/// in-flight requests drain.
pub async fn run_server(
    host: &str,
    port: u16,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await.inspect_err(|e| {
        tracing::error!(error = %e, addr = %addr, "[GATEWAY] Failed to bind");
    })?;

    tracing::info!(addr = %addr, "[GATEWAY] Listening");
    tracing::info!("[GATEWAY] API docs: http://{}/api-docs/openapi.json", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    tracing::info!("[GATEWAY] Stopped");
    Ok(())
}
