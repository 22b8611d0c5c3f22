//! Exchange Error Types
//!
//! - `FetchError`: snapshot retrieval failed (stale data is kept)
//! - `ActionError`: remote action collaborator reported failure
//! - `ExchangeError`: what the orchestrator hands back to callers
//!
//! A guard rejection is not an error: it surfaces as
//! [`TransitionOutcome::Dropped`](super::types::TransitionOutcome::Dropped).

use thiserror::Error;

use super::types::RecordKind;

/// Snapshot retrieval failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Agent unreachable: {0}")]
    Transport(String),

    #[error("Agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed agent payload: {0}")]
    Malformed(String),
}

/// Remote action failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    #[error("Agent unreachable: {0}")]
    Transport(String),

    #[error("Agent rejected action (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Malformed agent response: {0}")]
    Malformed(String),

    #[error("Unsupported transition {transition} for {kind}")]
    Unsupported {
        kind: RecordKind,
        transition: String,
    },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Orchestrator error taxonomy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Snapshot fetch for {kind} failed: {source}")]
    Fetch {
        kind: RecordKind,
        #[source]
        source: FetchError,
    },

    #[error("Record not found: {kind}/{identity}")]
    RecordNotFound { kind: RecordKind, identity: String },

    #[error("Unknown transition {transition} for {kind}")]
    UnknownTransition {
        kind: RecordKind,
        transition: String,
    },

    #[error("Transition {transition} not available for {kind}/{identity} in state {state}")]
    TransitionNotAvailable {
        kind: RecordKind,
        identity: String,
        transition: String,
        state: String,
    },

    #[error("Transition {transition} on {kind}/{identity} failed: {message}")]
    TransitionFailed {
        kind: RecordKind,
        identity: String,
        transition: String,
        message: String,
    },

    #[error("Background task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ExchangeError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::Fetch { .. } => "FETCH_FAILED",
            ExchangeError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            ExchangeError::UnknownTransition { .. } => "UNKNOWN_TRANSITION",
            ExchangeError::TransitionNotAvailable { .. } => "TRANSITION_NOT_AVAILABLE",
            ExchangeError::TransitionFailed { .. } => "TRANSITION_FAILED",
            ExchangeError::TaskNotFound(_) => "TASK_NOT_FOUND",
            ExchangeError::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            ExchangeError::InvalidRequest(_) | ExchangeError::UnknownTransition { .. } => 400,
            ExchangeError::RecordNotFound { .. } | ExchangeError::TaskNotFound(_) => 404,
            ExchangeError::TransitionNotAvailable { .. } => 409,
            ExchangeError::TransitionFailed { .. } => 502,
            ExchangeError::Fetch { .. } => 503,
        }
    }
}
