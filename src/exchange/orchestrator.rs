//! Exchange Orchestrator
//!
//! Composition root for the exchange lifecycle. Per record kind it pulls a
//! snapshot, runs the auto-trigger scanner against it and exposes a
//! read-only projection of records plus their currently legal actions.
//! Every transition, manual or automatic, goes through the in-flight guard.
//!
//! # Refresh cycle
//!
//! ```text
//! issue seq ─▶ fetch ─▶ newer seq applied? ── yes ─▶ discard
//!                            │ no
//!                            ▼
//!                 replace snapshot wholesale ─▶ plan auto-fires ─▶ run (isolated)
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

use super::error::ExchangeError;
use super::guard::InFlightGuard;
use super::policy::{TransitionDescriptor, TransitionPolicy};
use super::scanner::{AutoFireCandidate, AutoFireReport, AutoFireStatus, AutoTriggerScanner, RetryPolicy};
use super::source::{ActionExecutor, Operation, RecordSource};
use super::tasks::{BackgroundTask, BackgroundTaskTracker, TaskId};
use super::types::{ExchangeRecord, RecordKind, TransitionOutcome, normalize_snapshot};

/// Who started a guarded call; decides which scanner markers it writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireMode {
    Manual,
    Auto,
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Run auto-fire transitions after each applied snapshot
    pub auto_fire: bool,
    pub retry: RetryPolicy,
    /// Timeout for background operations started without one
    pub task_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            auto_fire: true,
            retry: RetryPolicy::default(),
            task_timeout: Duration::from_secs(600),
        }
    }
}

/// Last snapshot failure for a kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RefreshFailure {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Result of one `refresh` call
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RefreshReport {
    pub kind: RecordKind,
    /// Sequence number issued to this refresh
    pub sequence: u64,
    /// `false` if a newer refresh was applied first and this response was discarded
    pub applied: bool,
    /// Records in the current snapshot
    pub records: usize,
    pub auto_fired: Vec<AutoFireReport>,
}

/// Action available on a record right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ActionView {
    pub name: String,
    pub auto_fire: bool,
    pub in_flight: bool,
}

/// Record plus its legal actions
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProjectedRecord {
    pub record: ExchangeRecord,
    pub actions: Vec<ActionView>,
}

/// Read-only view of one kind
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Projection {
    pub kind: RecordKind,
    pub records: Vec<ProjectedRecord>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Set while the last refresh failed; `records` is then the last good snapshot
    pub last_error: Option<RefreshFailure>,
}

#[derive(Debug, Default)]
struct KindSlot {
    snapshot: Arc<Vec<ExchangeRecord>>,
    issued_seq: u64,
    applied_seq: u64,
    fetched_at: Option<DateTime<Utc>>,
    last_error: Option<RefreshFailure>,
}

/// Exchange Orchestrator
pub struct Orchestrator {
    source: Arc<dyn RecordSource>,
    executor: Arc<dyn ActionExecutor>,
    policy: TransitionPolicy,
    guard: InFlightGuard,
    scanner: AutoTriggerScanner,
    tasks: BackgroundTaskTracker,
    slots: DashMap<RecordKind, KindSlot>,
    task_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn RecordSource>,
        executor: Arc<dyn ActionExecutor>,
        config: OrchestratorConfig,
    ) -> Self {
        let policy = TransitionPolicy::new();
        let scanner = if config.auto_fire {
            AutoTriggerScanner::new(policy, config.retry)
        } else {
            AutoTriggerScanner::disabled(policy)
        };
        Self {
            source,
            executor,
            policy,
            guard: InFlightGuard::new(),
            scanner,
            tasks: BackgroundTaskTracker::new(),
            slots: DashMap::new(),
            task_timeout: config.task_timeout,
        }
    }

    /// Create with default configuration
    pub fn with_defaults(source: Arc<dyn RecordSource>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self::new(source, executor, OrchestratorConfig::default())
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    pub fn guard(&self) -> &InFlightGuard {
        &self.guard
    }

    pub fn scanner(&self) -> &AutoTriggerScanner {
        &self.scanner
    }

    pub fn tasks(&self) -> &BackgroundTaskTracker {
        &self.tasks
    }

    // ========================================================================
    // Snapshot
    // ========================================================================

    /// Pull a fresh snapshot for `kind` and run auto-fires against it.
    ///
    /// On fetch failure the previous snapshot stays in place and the error is
    /// both stored and returned. A response overtaken by a newer refresh is
    /// discarded and reported with `applied = false`.
    pub async fn refresh(&self, kind: RecordKind) -> Result<RefreshReport, ExchangeError> {
        let sequence = {
            let mut slot = self.slots.entry(kind).or_default();
            slot.issued_seq += 1;
            slot.issued_seq
        };
        debug!(kind = %kind, sequence, source = self.source.name(), "Refresh issued");

        let fetched = self.source.fetch(kind).await;

        let snapshot = {
            let mut slot = self.slots.entry(kind).or_default();
            if slot.applied_seq >= sequence {
                debug!(
                    kind = %kind,
                    sequence,
                    applied_seq = slot.applied_seq,
                    "Refresh overtaken by a newer one, response discarded"
                );
                return Ok(RefreshReport {
                    kind,
                    sequence,
                    applied: false,
                    records: slot.snapshot.len(),
                    auto_fired: Vec::new(),
                });
            }
            slot.applied_seq = sequence;

            match fetched {
                Ok(raw) => {
                    let snapshot = Arc::new(normalize_snapshot(kind, raw));
                    slot.snapshot = snapshot.clone();
                    slot.fetched_at = Some(Utc::now());
                    slot.last_error = None;
                    snapshot
                }
                Err(source) => {
                    warn!(
                        kind = %kind,
                        sequence,
                        error = %source,
                        kept = slot.snapshot.len(),
                        "Snapshot fetch failed, keeping last good snapshot"
                    );
                    slot.last_error = Some(RefreshFailure {
                        message: source.to_string(),
                        at: Utc::now(),
                    });
                    return Err(ExchangeError::Fetch { kind, source });
                }
            }
        };

        for record in snapshot.iter().filter(|r| !self.policy.recognizes(kind, &r.state)) {
            debug!(kind = %kind, identity = %record.identity, state = %record.state, "Unrecognized state, no actions");
        }

        let candidates = self.scanner.plan(&snapshot);
        let auto_fired = join_all(candidates.into_iter().map(|c| self.auto_fire(c))).await;

        debug!(
            kind = %kind,
            sequence,
            records = snapshot.len(),
            auto_fired = auto_fired.len(),
            "Snapshot applied"
        );

        Ok(RefreshReport {
            kind,
            sequence,
            applied: true,
            records: snapshot.len(),
            auto_fired,
        })
    }

    /// Latest applied snapshot (empty before the first successful refresh)
    pub fn snapshot(&self, kind: RecordKind) -> Arc<Vec<ExchangeRecord>> {
        self.slots
            .get(&kind)
            .map(|s| s.snapshot.clone())
            .unwrap_or_default()
    }

    pub fn last_error(&self, kind: RecordKind) -> Option<RefreshFailure> {
        self.slots.get(&kind).and_then(|s| s.last_error.clone())
    }

    /// Records of `kind` with their legal actions, rebuilt from the latest
    /// snapshot and policy
    pub fn projection(&self, kind: RecordKind) -> Projection {
        let (snapshot, fetched_at, last_error) = match self.slots.get(&kind) {
            Some(slot) => (slot.snapshot.clone(), slot.fetched_at, slot.last_error.clone()),
            None => (Arc::default(), None, None),
        };

        let records = snapshot
            .iter()
            .map(|record| ProjectedRecord {
                actions: self
                    .policy
                    .legal_transitions(kind, &record.state)
                    .into_iter()
                    .map(|t| ActionView {
                        name: t.name.to_string(),
                        auto_fire: t.auto_fire,
                        in_flight: self.guard.is_held(kind, &record.identity, t.name),
                    })
                    .collect(),
                record: record.clone(),
            })
            .collect();

        Projection {
            kind,
            records,
            fetched_at,
            last_error,
        }
    }

    fn find_record(&self, kind: RecordKind, identity: &str) -> Option<ExchangeRecord> {
        let slot = self.slots.get(&kind)?;
        slot.snapshot
            .iter()
            .find(|r| r.identity == identity)
            .cloned()
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Run one transition against one record of the latest snapshot.
    ///
    /// A duplicate of an in-flight `(kind, identity, transition)` returns
    /// [`TransitionOutcome::Dropped`] without reaching the agent.
    pub async fn invoke(
        &self,
        kind: RecordKind,
        identity: &str,
        transition: &str,
        params: &Value,
    ) -> Result<TransitionOutcome, ExchangeError> {
        let descriptor = self.policy.descriptor(kind, transition).ok_or_else(|| {
            ExchangeError::UnknownTransition {
                kind,
                transition: transition.to_string(),
            }
        })?;

        let record = self
            .find_record(kind, identity)
            .ok_or_else(|| ExchangeError::RecordNotFound {
                kind,
                identity: identity.to_string(),
            })?;

        if !descriptor.applies_when(&record.state) {
            return Err(ExchangeError::TransitionNotAvailable {
                kind,
                identity: identity.to_string(),
                transition: transition.to_string(),
                state: record.state.to_string(),
            });
        }

        self.execute_guarded(kind, identity, descriptor, params.clone(), FireMode::Manual)
            .await
            .map_err(|message| ExchangeError::TransitionFailed {
                kind,
                identity: identity.to_string(),
                transition: transition.to_string(),
                message,
            })
    }

    async fn auto_fire(&self, candidate: AutoFireCandidate) -> AutoFireReport {
        let AutoFireCandidate { record, transition } = candidate;
        let kind = record.kind;
        let identity = record.identity;

        let (status, error) = match self
            .execute_guarded(kind, &identity, transition, json!({}), FireMode::Auto)
            .await
        {
            Ok(TransitionOutcome::Completed { .. }) => (AutoFireStatus::Completed, None),
            Ok(TransitionOutcome::Dropped) => (AutoFireStatus::Dropped, None),
            Err(message) => (AutoFireStatus::Failed, Some(message)),
        };

        AutoFireReport {
            kind,
            identity,
            transition: transition.name.to_string(),
            status,
            error,
        }
    }

    /// guard-acquire → remote call → guard-release.
    ///
    /// The permit is taken here and moved into a spawned task that owns the
    /// remote call, so dropping the caller never aborts a dispatched
    /// transition. Scanner markers are written by that task before the permit
    /// is released. Executor errors and panics both come back as
    /// `Err(message)`.
    async fn execute_guarded(
        &self,
        kind: RecordKind,
        identity: &str,
        descriptor: &'static TransitionDescriptor,
        params: Value,
        mode: FireMode,
    ) -> Result<TransitionOutcome, String> {
        let transition = descriptor.name;
        let Some(permit) = self.guard.try_acquire(kind, identity, transition) else {
            return Ok(TransitionOutcome::Dropped);
        };
        if mode == FireMode::Auto && !self.scanner.is_eligible(kind, identity) {
            debug!(kind = %kind, identity, transition, "Auto-fire already settled, skipping");
            return Ok(TransitionOutcome::Dropped);
        }

        let executor = self.executor.clone();
        let scanner = self.scanner.clone();
        let identity = identity.to_string();
        let call = tokio::spawn(async move {
            let result = match AssertUnwindSafe(executor.execute(kind, transition, &identity, &params))
                .catch_unwind()
                .await
            {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(kind = %kind, identity = %identity, transition, panic = %message, "Executor panicked");
                    Err(format!("executor panicked: {}", message))
                }
            };

            match &result {
                Ok(_) => {
                    if descriptor.auto_fire {
                        scanner.record_success(kind, &identity);
                    }
                    info!(kind = %kind, identity = %identity, transition, mode = ?mode, "Transition completed");
                }
                Err(message) if mode == FireMode::Auto => {
                    let marker = scanner.record_failure(kind, &identity, message);
                    warn!(
                        kind = %kind,
                        identity = %identity,
                        transition,
                        error = %message,
                        marker = ?marker,
                        "Auto-fire failed"
                    );
                }
                Err(message) => {
                    warn!(kind = %kind, identity = %identity, transition, error = %message, "Transition failed");
                }
            }

            drop(permit);
            result
        });

        match call.await {
            Ok(result) => result.map(|response| TransitionOutcome::Completed { response }),
            Err(e) => Err(format!("transition task aborted: {}", e)),
        }
    }

    // ========================================================================
    // Background tasks
    // ========================================================================

    /// Validate `operation`, register it and dispatch it on the runtime.
    ///
    /// The task outlives the caller. Timeout or dismissal drops the in-flight
    /// dispatch.
    pub fn start_background_task(
        &self,
        operation: Operation,
        timeout: Option<Duration>,
    ) -> Result<BackgroundTask, ExchangeError> {
        operation.validate().map_err(ExchangeError::InvalidRequest)?;

        let timeout = timeout.unwrap_or(self.task_timeout);
        let id = self.tasks.start(operation.label(), timeout);
        let cancel = self
            .tasks
            .cancellation_token(&id)
            .ok_or_else(|| ExchangeError::TaskNotFound(id.to_string()))?;

        let executor = self.executor.clone();
        let tasks = self.tasks.clone();
        tokio::spawn(async move {
            let dispatch = AssertUnwindSafe(executor.dispatch(&operation)).catch_unwind();
            tokio::select! {
                result = dispatch => match result {
                    Ok(Ok(result_ref)) => {
                        tasks.complete(&id, Some(result_ref));
                    }
                    Ok(Err(e)) => {
                        tasks.fail(&id, e.to_string());
                    }
                    Err(panic) => {
                        tasks.fail(&id, format!("operation panicked: {}", panic_message(panic.as_ref())));
                    }
                },
                _ = cancel.cancelled() => {
                    debug!(task_id = %id, operation = operation.label(), "Dispatch abandoned");
                }
            }
        });

        self.tasks
            .get(&id)
            .ok_or_else(|| ExchangeError::TaskNotFound(id.to_string()))
    }

    pub fn list_background_tasks(&self) -> Vec<BackgroundTask> {
        self.tasks.list()
    }

    pub fn get_background_task(&self, id: &TaskId) -> Result<BackgroundTask, ExchangeError> {
        self.tasks
            .get(id)
            .ok_or_else(|| ExchangeError::TaskNotFound(id.to_string()))
    }

    pub fn dismiss_background_task(&self, id: &TaskId) -> Result<BackgroundTask, ExchangeError> {
        self.tasks
            .dismiss(id)
            .ok_or_else(|| ExchangeError::TaskNotFound(id.to_string()))
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::source::mock::MockAgent;

    fn orchestrator(agent: &Arc<MockAgent>) -> Orchestrator {
        Orchestrator::new(
            agent.clone(),
            agent.clone(),
            OrchestratorConfig {
                retry: RetryPolicy::immediate(),
                ..Default::default()
            },
        )
    }

    fn credential(id: &str, state: &str) -> Value {
        json!({ "cred_ex_id": id, "state": state, "connection_id": "conn-1" })
    }

    #[tokio::test]
    async fn test_projection_lists_legal_actions() {
        let agent = Arc::new(MockAgent::new());
        agent.set_snapshot(
            RecordKind::Credential,
            vec![
                credential("cx-1", "offer-received"),
                credential("cx-2", "credential_received"),
                credential("cx-3", "something_new"),
            ],
        );
        let orch = orchestrator(&agent);

        let report = orch.refresh(RecordKind::Credential).await.unwrap();
        assert!(report.applied);
        assert_eq!(report.records, 3);
        assert!(report.auto_fired.is_empty());

        let projection = orch.projection(RecordKind::Credential);
        let actions: Vec<Vec<&str>> = projection
            .records
            .iter()
            .map(|r| r.actions.iter().map(|a| a.name.as_str()).collect())
            .collect();
        assert_eq!(
            actions,
            vec![vec!["request-credential"], vec!["store-credential"], vec![]]
        );
        assert!(projection.fetched_at.is_some());
        assert!(projection.last_error.is_none());
    }

    #[tokio::test]
    async fn test_projection_before_first_refresh_is_empty() {
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&agent);
        let projection = orch.projection(RecordKind::Connection);
        assert!(projection.records.is_empty());
        assert!(projection.fetched_at.is_none());
    }

    #[tokio::test]
    async fn test_invoke_unknown_record_and_transition() {
        let agent = Arc::new(MockAgent::new());
        agent.set_snapshot(RecordKind::Credential, vec![credential("cx-1", "offer_received")]);
        let orch = orchestrator(&agent);
        orch.refresh(RecordKind::Credential).await.unwrap();

        let err = orch
            .invoke(RecordKind::Credential, "cx-404", "request-credential", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RECORD_NOT_FOUND");

        let err = orch
            .invoke(RecordKind::Credential, "cx-1", "teleport", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_TRANSITION");

        let err = orch
            .invoke(RecordKind::Credential, "cx-1", "store-credential", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "TRANSITION_NOT_AVAILABLE");
        assert_eq!(agent.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invoke_failure_releases_guard() {
        let agent = Arc::new(MockAgent::new());
        agent.set_snapshot(RecordKind::Credential, vec![credential("cx-1", "offer_received")]);
        agent.fail_next("cx-1", 1);
        let orch = orchestrator(&agent);
        orch.refresh(RecordKind::Credential).await.unwrap();

        let err = orch
            .invoke(RecordKind::Credential, "cx-1", "request-credential", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::TransitionFailed { .. }));
        assert!(orch.guard().is_empty());

        let outcome = orch
            .invoke(RecordKind::Credential, "cx-1", "request-credential", &json!({}))
            .await
            .unwrap();
        assert!(outcome.is_completed());
        assert_eq!(agent.call_count("request-credential", "cx-1"), 2);
    }

    /// A candidate planned before a concurrent success landed must not fire
    #[tokio::test]
    async fn test_stale_auto_fire_candidate_skipped() {
        let agent = Arc::new(MockAgent::new());
        let orch = orchestrator(&agent);
        let snapshot = normalize_snapshot(
            RecordKind::Presentation,
            vec![json!({ "pres_ex_id": "px-1", "state": "presentation_received" })],
        );

        let mut candidates = orch.scanner().plan(&snapshot);
        assert_eq!(candidates.len(), 1);
        orch.scanner().record_success(RecordKind::Presentation, "px-1");

        let report = orch.auto_fire(candidates.remove(0)).await;
        assert_eq!(report.status, AutoFireStatus::Dropped);
        assert_eq!(agent.total_calls(), 0);
        assert!(orch.guard().is_empty());
    }

    /// The handled marker is visible no later than the permit release
    #[tokio::test]
    async fn test_handled_written_before_release() {
        let agent = Arc::new(MockAgent::new());
        agent.set_snapshot(
            RecordKind::Presentation,
            vec![json!({ "pres_ex_id": "px-1", "state": "presentation_received" })],
        );
        agent.hold_actions();
        let orch = Arc::new(orchestrator(&agent));

        let refresh = tokio::spawn({
            let orch = orch.clone();
            async move { orch.refresh(RecordKind::Presentation).await }
        });
        while orch.guard().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(!orch.scanner().is_handled(RecordKind::Presentation, "px-1"));

        agent.release_actions();
        while !orch.guard().is_empty() {
            tokio::task::yield_now().await;
        }
        assert!(orch.scanner().is_handled(RecordKind::Presentation, "px-1"));

        let report = refresh.await.unwrap().unwrap();
        assert_eq!(report.auto_fired[0].status, AutoFireStatus::Completed);
    }

    #[tokio::test]
    async fn test_manual_verify_marks_handled() {
        let agent = Arc::new(MockAgent::new());
        let orch = Orchestrator::new(
            agent.clone(),
            agent.clone(),
            OrchestratorConfig {
                auto_fire: false,
                ..Default::default()
            },
        );
        agent.set_snapshot(
            RecordKind::Presentation,
            vec![json!({ "pres_ex_id": "px-1", "state": "presentation_received" })],
        );
        orch.refresh(RecordKind::Presentation).await.unwrap();
        assert_eq!(agent.total_calls(), 0);

        orch.invoke(RecordKind::Presentation, "px-1", "verify-presentation", &json!({}))
            .await
            .unwrap();
        assert!(orch.scanner().is_handled(RecordKind::Presentation, "px-1"));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(boxed.as_ref()), "static");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
