//! API Response types and error codes
//!
//! - `ApiResponse<T>`: Unified response wrapper
//! - `ApiError`: error half of every handler result
//! - `error_codes`: Standard error code constants

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::exchange::ExchangeError;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// All API responses follow this structure:
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or null (error)
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Create success response
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Create error response
    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Handler error: HTTP status plus envelope code/message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

/// Result type for all handlers
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Wrap data in a success envelope
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl From<ExchangeError> for ApiError {
    fn from(err: ExchangeError) -> Self {
        let status = StatusCode::from_u16(err.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &err {
            ExchangeError::InvalidRequest(_) => error_codes::INVALID_PARAMETER,
            ExchangeError::UnknownTransition { .. } => error_codes::UNKNOWN_TRANSITION,
            ExchangeError::RecordNotFound { .. } => error_codes::RECORD_NOT_FOUND,
            ExchangeError::TaskNotFound(_) => error_codes::TASK_NOT_FOUND,
            ExchangeError::TransitionNotAvailable { .. } => error_codes::TRANSITION_NOT_AVAILABLE,
            ExchangeError::TransitionFailed { .. } => error_codes::TRANSITION_FAILED,
            ExchangeError::Fetch { .. } => error_codes::AGENT_UNAVAILABLE,
        };
        Self::new(status, code, format!("{}: {}", err.code(), err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

// ============================================================================
// Error Codes
// ============================================================================

/// Standard API error codes
pub mod error_codes {
    // Success
    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const UNKNOWN_TRANSITION: i32 = 1002;

    // Resource errors (4xxx)
    pub const RECORD_NOT_FOUND: i32 = 4001;
    pub const TASK_NOT_FOUND: i32 = 4002;
    pub const TRANSITION_NOT_AVAILABLE: i32 = 4091;

    // Upstream errors (5xxx)
    pub const TRANSITION_FAILED: i32 = 5021;
    pub const AGENT_UNAVAILABLE: i32 = 5031;
}
