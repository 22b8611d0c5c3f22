//! Background Task Tracker
//!
//! Tracks fire-and-forget operations (credential issuance, proof requests)
//! independently of whoever started them. A task lives until it is dismissed
//! or the process exits.
//!
//! # Status transitions
//!
//! ```text
//!            complete()
//! RUNNING ─────────────▶ DONE
//!    │       fail()
//!    ├─────────────────▶ FAILED
//!    │   timeout elapsed
//!    └─────────────────▶ TIMEOUT   (cancellation token fired)
//! ```
//!
//! Exactly one terminal transition is applied; later signals are no-ops so
//! racing completion and timeout callbacks cannot flip a settled task.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Task ID - ULID-based, sortable by creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(ulid::Ulid);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Done,
    Failed,
    /// No terminal signal within the timeout. The remote side effect may
    /// still have happened.
    Timeout,
}

impl TaskStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Read-only view of a tracked task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct BackgroundTask {
    #[schema(value_type = String, example = "01HV6Q1K8Z9X3T4N5M6P7R8S9T")]
    pub id: TaskId,
    /// Operation label, e.g. `issue-credential`
    pub operation: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    /// Time since start, frozen once the task settles
    pub elapsed_ms: u64,
    pub status: TaskStatus,
    pub result_ref: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug)]
struct TaskEntry {
    id: TaskId,
    operation: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    started: Instant,
    finished: Option<Instant>,
    timeout: Duration,
    status: TaskStatus,
    result_ref: Option<String>,
    error: Option<String>,
    /// Fired on timeout or dismissal; observed by the operation
    cancel: CancellationToken,
    /// Fired on any terminal transition; stops the timeout timer
    settled: CancellationToken,
}

impl TaskEntry {
    fn view(&self) -> BackgroundTask {
        let end = self.finished.unwrap_or_else(Instant::now);
        BackgroundTask {
            id: self.id,
            operation: self.operation.clone(),
            started_at: self.started_at,
            finished_at: self.finished_at,
            timeout_ms: self.timeout.as_millis() as u64,
            elapsed_ms: end.saturating_duration_since(self.started).as_millis() as u64,
            status: self.status,
            result_ref: self.result_ref.clone(),
            error: self.error.clone(),
        }
    }

    /// Apply a terminal transition; `false` if already settled
    fn settle(&mut self, status: TaskStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.finished = Some(Instant::now());
        self.finished_at = Some(Utc::now());
        self.settled.cancel();
        true
    }
}

/// Process-wide registry of background tasks
///
/// Cloning is cheap and every clone sees the same registry.
#[derive(Clone)]
pub struct BackgroundTaskTracker {
    tasks: Arc<DashMap<TaskId, TaskEntry>>,
    /// Monotonic within a millisecond, so id order is start order
    ids: Arc<Mutex<ulid::Generator>>,
}

impl fmt::Debug for BackgroundTaskTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskTracker")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl Default for BackgroundTaskTracker {
    fn default() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            ids: Arc::new(Mutex::new(ulid::Generator::new())),
        }
    }
}

impl BackgroundTaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> TaskId {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        // Overflow needs 2^80 ids in one millisecond
        TaskId(ids.generate().unwrap_or_else(|_| ulid::Ulid::new()))
    }

    /// Register a running task and arm its timeout.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, operation: &str, timeout: Duration) -> TaskId {
        let id = self.next_id();
        let started = Instant::now();
        let deadline = started + timeout;
        let settled = CancellationToken::new();
        let entry = TaskEntry {
            id,
            operation: operation.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            started,
            finished: None,
            timeout,
            status: TaskStatus::Running,
            result_ref: None,
            error: None,
            cancel: CancellationToken::new(),
            settled: settled.clone(),
        };
        self.tasks.insert(id, entry);

        let tracker = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => tracker.expire(id),
                _ = settled.cancelled() => {}
            }
        });

        info!(task_id = %id, operation, timeout_ms = timeout.as_millis() as u64, "Background task started");
        id
    }

    /// Cancellation signal for the task's underlying operation
    pub fn cancellation_token(&self, id: &TaskId) -> Option<CancellationToken> {
        self.tasks.get(id).map(|e| e.cancel.clone())
    }

    /// RUNNING → DONE. Returns `false` if the task is unknown or settled.
    pub fn complete(&self, id: &TaskId, result_ref: Option<String>) -> bool {
        let Some(mut entry) = self.tasks.get_mut(id) else {
            debug!(task_id = %id, "Completion for unknown task ignored");
            return false;
        };
        if !entry.settle(TaskStatus::Done) {
            debug!(task_id = %id, status = %entry.status, "Late completion ignored");
            return false;
        }
        entry.result_ref = result_ref;
        info!(
            task_id = %id,
            operation = %entry.operation,
            result_ref = ?entry.result_ref,
            "Background task done"
        );
        true
    }

    /// RUNNING → FAILED. Returns `false` if the task is unknown or settled.
    pub fn fail(&self, id: &TaskId, error: impl Into<String>) -> bool {
        let Some(mut entry) = self.tasks.get_mut(id) else {
            debug!(task_id = %id, "Failure for unknown task ignored");
            return false;
        };
        if !entry.settle(TaskStatus::Failed) {
            debug!(task_id = %id, status = %entry.status, "Late failure ignored");
            return false;
        }
        entry.error = Some(error.into());
        warn!(
            task_id = %id,
            operation = %entry.operation,
            error = ?entry.error,
            "Background task failed"
        );
        true
    }

    /// RUNNING → TIMEOUT and fire the cancellation token
    fn expire(&self, id: TaskId) {
        let Some(mut entry) = self.tasks.get_mut(&id) else {
            return;
        };
        if !entry.settle(TaskStatus::Timeout) {
            return;
        }
        entry.error = Some(format!(
            "no result within {}ms; the remote side may still complete",
            entry.timeout.as_millis()
        ));
        entry.cancel.cancel();
        warn!(task_id = %id, operation = %entry.operation, "Background task timed out");
    }

    pub fn get(&self, id: &TaskId) -> Option<BackgroundTask> {
        self.tasks.get(id).map(|e| e.view())
    }

    /// All tasks, oldest first
    pub fn list(&self) -> Vec<BackgroundTask> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|e| e.view()).collect();
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Remove a task. A running task is cancelled first.
    pub fn dismiss(&self, id: &TaskId) -> Option<BackgroundTask> {
        let (_, entry) = self.tasks.remove(id)?;
        if !entry.status.is_terminal() {
            entry.cancel.cancel();
            entry.settled.cancel();
            info!(task_id = %id, operation = %entry.operation, "Running background task dismissed");
        }
        Some(entry.view())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
