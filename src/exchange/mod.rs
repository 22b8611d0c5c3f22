//! Exchange Lifecycle Orchestration
//!
//! Drives connection, credential and presentation exchanges held by a remote
//! agent: polls snapshots, decides which transitions are legal, prevents
//! duplicate concurrent transitions, auto-fires the ones that need no user
//! input and tracks long-running operations.
//!
//! # Architecture
//!
//! ```text
//! RecordSource ─▶ Orchestrator ─▶ TransitionPolicy ─▶ projection
//!                      │    └──▶ AutoTriggerScanner ──┐
//!                      │                              ▼
//!                      └────────▶ InFlightGuard ─▶ ActionExecutor
//!
//! BackgroundTaskTracker: independent store, fed by Operation dispatches
//! ```
//!
//! # Invariants
//!
//! 1. **One in flight**: a `(kind, identity, transition)` triple executes at most once concurrently
//! 2. **Handled is forever**: a successful auto-fire never repeats for that identity
//! 3. **Stale but available**: a failed fetch never clears the last good snapshot
//! 4. **Last issued wins**: a refresh response older than the applied one is discarded
//! 5. **One terminal status**: a background task settles exactly once

pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod policy;
pub mod poller;
pub mod scanner;
pub mod source;
pub mod state;
pub mod tasks;
pub mod types;


// Re-exports for convenience
pub use error::{ActionError, ExchangeError, FetchError};
pub use guard::{InFlightGuard, InFlightPermit};
pub use orchestrator::{
    ActionView, Orchestrator, OrchestratorConfig, ProjectedRecord, Projection, RefreshFailure,
    RefreshReport,
};
pub use policy::{TransitionDescriptor, TransitionPolicy};
pub use poller::{ExchangePoller, PollerConfig};
pub use scanner::{AutoFireReport, AutoFireStatus, AutoTriggerScanner, MarkerState, RetryPolicy};
pub use source::{ActionExecutor, CredentialAttribute, Operation, RecordSource};
pub use state::StateTag;
pub use tasks::{BackgroundTask, BackgroundTaskTracker, TaskId, TaskStatus};
pub use types::{ExchangeRecord, RawRecord, RecordKind, TransitionOutcome};
