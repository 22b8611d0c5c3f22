//! Auto-Trigger Scanner
//!
//! On every fresh snapshot, finds records sitting in a state whose transition
//! is marked `auto_fire` and that have not been handled yet.
//!
//! # Marker lifecycle
//!
//! ```text
//!            success                       failure (n < max)
//! (absent) ───────────▶ HANDLED     (absent) ─────────────────▶ FAILED(n)
//!                       (permanent)  FAILED(n) ── backoff elapsed ─▶ eligible again
//!                                    FAILED(n) ── n == max ────────▶ PARKED
//! ```
//!
//! HANDLED is never cleared for the life of the process, even if the remote
//! state regresses and re-qualifies. PARKED identities no longer auto-fire;
//! a manual success still moves them to HANDLED.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn};
use utoipa::ToSchema;

use super::policy::{TransitionDescriptor, TransitionPolicy};
use super::types::{ExchangeRecord, RecordKey, RecordKind};

/// Retry/backoff policy for failed auto-fire attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failures after which the identity is parked (`None` = never)
    pub max_attempts: Option<u32>,
    /// Delay after the first failure
    pub base_backoff: Duration,
    /// Upper bound for the exponential delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(5),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Retry on every scan, forever
    pub fn immediate() -> Self {
        Self {
            max_attempts: None,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failures
    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures == 0 || self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let shift = (failures - 1).min(20);
        self.base_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    fn exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}

/// Per-identity auto-fire bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerState {
    /// Fired successfully; never fires again
    Handled,
    /// Failed `attempts` times; eligible again at `retry_at`
    Failed {
        attempts: u32,
        retry_at: Instant,
        last_error: String,
    },
    /// Gave up after `attempts` failures
    Parked { attempts: u32, last_error: String },
}

/// One auto-fire to run this cycle
#[derive(Debug, Clone)]
pub struct AutoFireCandidate {
    pub record: ExchangeRecord,
    pub transition: &'static TransitionDescriptor,
}

/// Result of one auto-fire attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AutoFireStatus {
    Completed,
    /// Same transition was already in flight
    Dropped,
    Failed,
}

/// Per-record report of an auto-fire attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct AutoFireReport {
    pub kind: RecordKind,
    pub identity: String,
    pub transition: String,
    pub status: AutoFireStatus,
    pub error: Option<String>,
}

/// Auto-trigger scanner with its handled-marker set
///
/// Clones share the marker set.
#[derive(Debug, Clone)]
pub struct AutoTriggerScanner {
    policy: TransitionPolicy,
    retry: RetryPolicy,
    enabled: bool,
    markers: Arc<DashMap<RecordKey, MarkerState>>,
}

impl AutoTriggerScanner {
    pub fn new(policy: TransitionPolicy, retry: RetryPolicy) -> Self {
        Self {
            policy,
            retry,
            enabled: true,
            markers: Arc::new(DashMap::new()),
        }
    }

    /// Scanner that never proposes anything
    pub fn disabled(policy: TransitionPolicy) -> Self {
        Self {
            enabled: false,
            ..Self::new(policy, RetryPolicy::default())
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Compute the auto-fire candidates for a fresh snapshot.
    ///
    /// Pure with respect to the marker set: nothing is recorded until the
    /// caller reports the outcome.
    pub fn plan(&self, snapshot: &[ExchangeRecord]) -> Vec<AutoFireCandidate> {
        if !self.enabled {
            return Vec::new();
        }

        let now = Instant::now();
        let mut candidates = Vec::new();

        for record in snapshot {
            for transition in self.policy.auto_transitions(record.kind, &record.state) {
                let key = RecordKey::new(record.kind, record.identity.clone());
                if self.eligible_at(&key, now) {
                    candidates.push(AutoFireCandidate {
                        record: record.clone(),
                        transition,
                    });
                } else {
                    debug!(key = %key, transition = transition.name, "Auto-fire skipped");
                }
            }
        }

        candidates
    }

    fn eligible_at(&self, key: &RecordKey, now: Instant) -> bool {
        match self.markers.get(key).as_deref() {
            None => true,
            Some(MarkerState::Handled) | Some(MarkerState::Parked { .. }) => false,
            Some(MarkerState::Failed { retry_at, .. }) => *retry_at <= now,
        }
    }

    /// Whether an auto-fire for `identity` may run right now.
    ///
    /// Re-checked under the in-flight permit, since markers can change
    /// between `plan` and the call.
    pub fn is_eligible(&self, kind: RecordKind, identity: &str) -> bool {
        self.enabled && self.eligible_at(&RecordKey::new(kind, identity), Instant::now())
    }

    /// Mark an identity as permanently handled
    pub fn record_success(&self, kind: RecordKind, identity: &str) {
        self.markers
            .insert(RecordKey::new(kind, identity), MarkerState::Handled);
    }

    /// Record a failed attempt and return the resulting marker
    pub fn record_failure(&self, kind: RecordKind, identity: &str, error: &str) -> MarkerState {
        let key = RecordKey::new(kind, identity);
        let mut entry = self.markers.entry(key.clone()).or_insert(MarkerState::Failed {
            attempts: 0,
            retry_at: Instant::now(),
            last_error: String::new(),
        });

        let attempts = match &*entry {
            // A concurrent success wins; the failure is ignored.
            MarkerState::Handled => return MarkerState::Handled,
            MarkerState::Failed { attempts, .. } | MarkerState::Parked { attempts, .. } => {
                attempts + 1
            }
        };

        let next = if self.retry.exhausted(attempts) {
            warn!(
                key = %key,
                attempts,
                error,
                "Auto-fire parked after repeated failures; manual action required"
            );
            MarkerState::Parked {
                attempts,
                last_error: error.to_string(),
            }
        } else {
            MarkerState::Failed {
                attempts,
                retry_at: Instant::now() + self.retry.backoff_for(attempts),
                last_error: error.to_string(),
            }
        };

        *entry = next.clone();
        next
    }

    pub fn marker(&self, kind: RecordKind, identity: &str) -> Option<MarkerState> {
        self.markers
            .get(&RecordKey::new(kind, identity))
            .map(|m| m.value().clone())
    }

    pub fn is_handled(&self, kind: RecordKind, identity: &str) -> bool {
        matches!(self.marker(kind, identity), Some(MarkerState::Handled))
    }

    /// Number of identities marked handled
    pub fn handled_count(&self) -> usize {
        self.markers
            .iter()
            .filter(|m| matches!(m.value(), MarkerState::Handled))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presentation(identity: &str, state: &str) -> ExchangeRecord {
        ExchangeRecord::new(RecordKind::Presentation, identity, state)
    }

    fn scanner(retry: RetryPolicy) -> AutoTriggerScanner {
        AutoTriggerScanner::new(TransitionPolicy::new(), retry)
    }

    #[test]
    fn test_plan_picks_auto_fire_states_only() {
        let scanner = scanner(RetryPolicy::immediate());
        let snapshot = vec![
            presentation("px-1", "presentation_received"),
            presentation("px-2", "request_received"),
            presentation("px-3", "presentation-received"),
            ExchangeRecord::new(RecordKind::Credential, "cx-1", "credential_received"),
        ];

        let ids: Vec<_> = scanner
            .plan(&snapshot)
            .into_iter()
            .map(|c| c.record.identity)
            .collect();
        assert_eq!(ids, vec!["px-1", "px-3"]);
    }

    #[test]
    fn test_handled_never_replanned() {
        let scanner = scanner(RetryPolicy::immediate());
        let snapshot = vec![presentation("px-1", "presentation_received")];

        assert_eq!(scanner.plan(&snapshot).len(), 1);
        scanner.record_success(RecordKind::Presentation, "px-1");
        assert!(scanner.plan(&snapshot).is_empty());

        // Regressed and re-qualified: still handled
        let regressed = vec![presentation("px-1", "request_sent")];
        assert!(scanner.plan(&regressed).is_empty());
        assert!(scanner.plan(&snapshot).is_empty());
        assert_eq!(scanner.handled_count(), 1);
    }

    #[test]
    fn test_eligibility_shared_across_clones() {
        let scanner = scanner(RetryPolicy::default());
        let clone = scanner.clone();
        assert!(scanner.is_eligible(RecordKind::Presentation, "px-1"));

        clone.record_success(RecordKind::Presentation, "px-1");
        assert!(!scanner.is_eligible(RecordKind::Presentation, "px-1"));

        // Inside the backoff window
        clone.record_failure(RecordKind::Presentation, "px-2", "boom");
        assert!(!scanner.is_eligible(RecordKind::Presentation, "px-2"));

        let disabled = AutoTriggerScanner::disabled(TransitionPolicy::new());
        assert!(!disabled.is_eligible(RecordKind::Presentation, "px-3"));
    }

    #[test]
    fn test_failure_allows_retry_without_backoff() {
        let scanner = scanner(RetryPolicy::immediate());
        let snapshot = vec![presentation("px-1", "presentation_received")];

        for n in 1..=3 {
            assert_eq!(scanner.plan(&snapshot).len(), 1);
            let marker = scanner.record_failure(RecordKind::Presentation, "px-1", "boom");
            assert!(matches!(marker, MarkerState::Failed { attempts, .. } if attempts == n));
        }
        assert_eq!(scanner.plan(&snapshot).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_retry() {
        let scanner = scanner(RetryPolicy {
            max_attempts: None,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        });
        let snapshot = vec![presentation("px-1", "presentation_received")];

        scanner.record_failure(RecordKind::Presentation, "px-1", "boom");
        assert!(scanner.plan(&snapshot).is_empty());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(scanner.plan(&snapshot).len(), 1);

        scanner.record_failure(RecordKind::Presentation, "px-1", "boom");
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(scanner.plan(&snapshot).is_empty());
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(scanner.plan(&snapshot).len(), 1);
    }

    #[test]
    fn test_parked_after_max_attempts() {
        let scanner = scanner(RetryPolicy {
            max_attempts: Some(2),
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        });
        let snapshot = vec![presentation("px-1", "presentation_received")];

        scanner.record_failure(RecordKind::Presentation, "px-1", "first");
        assert_eq!(scanner.plan(&snapshot).len(), 1);
        let marker = scanner.record_failure(RecordKind::Presentation, "px-1", "second");
        assert_eq!(
            marker,
            MarkerState::Parked {
                attempts: 2,
                last_error: "second".into()
            }
        );
        assert!(scanner.plan(&snapshot).is_empty());

        // Manual success still lands
        scanner.record_success(RecordKind::Presentation, "px-1");
        assert!(scanner.is_handled(RecordKind::Presentation, "px-1"));
    }

    #[test]
    fn test_failure_after_success_is_ignored() {
        let scanner = scanner(RetryPolicy::immediate());
        scanner.record_success(RecordKind::Presentation, "px-1");
        let marker = scanner.record_failure(RecordKind::Presentation, "px-1", "late");
        assert_eq!(marker, MarkerState::Handled);
        assert!(scanner.is_handled(RecordKind::Presentation, "px-1"));
    }

    #[test]
    fn test_backoff_curve() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.backoff_for(0), Duration::ZERO);
        assert_eq!(retry.backoff_for(1), Duration::from_secs(1));
        assert_eq!(retry.backoff_for(3), Duration::from_secs(4));
        assert_eq!(retry.backoff_for(30), Duration::from_secs(60));
        assert_eq!(RetryPolicy::immediate().backoff_for(7), Duration::ZERO);
    }

    #[test]
    fn test_disabled_scanner() {
        let scanner = AutoTriggerScanner::disabled(TransitionPolicy::new());
        let snapshot = vec![presentation("px-1", "presentation_received")];
        assert!(scanner.plan(&snapshot).is_empty());
    }
}
