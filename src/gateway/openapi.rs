//! OpenAPI Documentation
//!
//! Auto-generated OpenAPI 3.0 documentation for the orchestrator API.
//!
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::agent::AgentStatus;
use crate::exchange::{
    ActionView, AutoFireReport, AutoFireStatus, BackgroundTask, CredentialAttribute,
    ExchangeRecord, Operation, ProjectedRecord, Projection, RecordKind, RefreshFailure,
    RefreshReport, TaskStatus,
};
use crate::gateway::handlers::HealthResponse;
use crate::gateway::types::{InvokeResponse, StartTaskRequest};

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Exchange Orchestrator API",
        version = "1.0.0",
        description = "Drives connection, credential and presentation exchanges on a credential agent.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::health::health_check,
        crate::gateway::handlers::exchange::get_projection,
        crate::gateway::handlers::exchange::refresh,
        crate::gateway::handlers::exchange::invoke,
        crate::gateway::handlers::tasks::start_task,
        crate::gateway::handlers::tasks::list_tasks,
        crate::gateway::handlers::tasks::get_task,
        crate::gateway::handlers::tasks::dismiss_task,
    ),
    components(
        schemas(
            HealthResponse,
            Projection,
            ProjectedRecord,
            ActionView,
            ExchangeRecord,
            RecordKind,
            RefreshReport,
            RefreshFailure,
            AutoFireReport,
            AutoFireStatus,
            InvokeResponse,
            StartTaskRequest,
            Operation,
            CredentialAttribute,
            BackgroundTask,
            TaskStatus,
            AgentStatus,
        )
    ),
    tags(
        (name = "Exchanges", description = "Snapshots, refresh and transitions per exchange kind"),
        (name = "Tasks", description = "Long-running agent operations tracked in the background"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;
