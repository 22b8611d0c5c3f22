//! Exchange Orchestrator
//!
//! Keeps a credential agent's connection, credential and presentation
//! exchanges moving: polls snapshots, fires automatic transitions, exposes
//! manual ones over HTTP and tracks long-running agent operations.
//!
//! # Modules
//!
//! - [`exchange`] - Snapshots, transition policy, in-flight guard, auto-fire, background tasks
//! - [`agent`] - HTTP client for the agent admin API
//! - [`gateway`] - axum HTTP API over the orchestrator
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod agent;
pub mod config;
pub mod exchange;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use agent::{AgentClient, AgentError, AgentStatus};
pub use config::{AppConfig, ConfigError};
pub use exchange::{
    ExchangeError, ExchangePoller, ExchangeRecord, Orchestrator, OrchestratorConfig, RecordKind,
    TransitionOutcome,
};
