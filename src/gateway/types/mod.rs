//! Gateway types module
//!
//! - [`response`]: `ApiResponse<T>` envelope, `ApiError`, error codes
//! - [`exchange`]: request/response DTOs for exchange and task endpoints

pub mod exchange;
pub mod response;

// Re-export commonly used types at module root
pub use exchange::{InvokeResponse, StartTaskRequest};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};
