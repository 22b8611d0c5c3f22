//! Exchange and task DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::exchange::{Operation, TransitionOutcome};

/// Result of a transition request
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct InvokeResponse {
    /// `completed` or `dropped` (same transition already in flight)
    #[schema(example = "completed")]
    pub outcome: String,
    /// Agent response body when completed
    #[schema(value_type = Option<Object>)]
    pub response: Option<Value>,
}

impl From<TransitionOutcome> for InvokeResponse {
    fn from(outcome: TransitionOutcome) -> Self {
        match outcome {
            TransitionOutcome::Completed { response } => Self {
                outcome: "completed".to_string(),
                response: Some(response),
            },
            TransitionOutcome::Dropped => Self {
                outcome: "dropped".to_string(),
                response: None,
            },
        }
    }
}

/// Start a background operation
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StartTaskRequest {
    #[serde(flatten)]
    pub operation: Operation,
    /// Overrides the configured default timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}
