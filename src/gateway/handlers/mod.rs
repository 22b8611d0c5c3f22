//! HTTP handlers
//!
//! - [`health`]: liveness and agent reachability
//! - [`exchange`]: projections, refresh, transitions
//! - [`tasks`]: background operations

pub mod exchange;
pub mod health;
pub mod tasks;

pub use exchange::{get_projection, invoke, refresh};
pub use health::{HealthResponse, health_check};
pub use tasks::{dismiss_task, get_task, list_tasks, start_task};

