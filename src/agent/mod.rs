//! Agent Adapter
//!
//! HTTP implementation of [`RecordSource`](crate::exchange::RecordSource) and
//! [`ActionExecutor`](crate::exchange::ActionExecutor) against an ACA-Py
//! style admin API.

pub mod client;
pub mod routes;

pub use client::{AgentClient, AgentError, AgentStatus};
