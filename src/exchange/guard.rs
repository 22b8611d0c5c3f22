//! In-Flight Guard
//!
//! Per-record mutual exclusion for transitions. At most one execution of a
//! given `(kind, identity, transition)` runs at a time inside this process;
//! a second request for a held triple is dropped, not queued.
//!
//! Membership lives in a `DashSet`, so `try_acquire` is a single atomic
//! insert-if-absent. The returned [`InFlightPermit`] releases the triple on
//! drop, which covers early returns, errors and unwinding alike.

use std::fmt;
use std::sync::Arc;

use dashmap::DashSet;
use tracing::debug;

use super::types::RecordKind;

/// `(kind, identity, transition)` triple currently executing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub kind: RecordKind,
    pub identity: String,
    pub transition: String,
}

impl InFlightKey {
    pub fn new(kind: RecordKind, identity: &str, transition: &str) -> Self {
        Self {
            kind,
            identity: identity.to_string(),
            transition: transition.to_string(),
        }
    }
}

impl fmt::Display for InFlightKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.kind, self.identity, self.transition)
    }
}

/// Shared in-flight marker set
///
/// Cloning is cheap and every clone sees the same set.
#[derive(Debug, Clone, Default)]
pub struct InFlightGuard {
    held: Arc<DashSet<InFlightKey>>,
}

impl InFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to mark a triple as in flight.
    ///
    /// Returns `None` if the triple is already held; the caller treats that as
    /// a no-op.
    pub fn try_acquire(
        &self,
        kind: RecordKind,
        identity: &str,
        transition: &str,
    ) -> Option<InFlightPermit> {
        let key = InFlightKey::new(kind, identity, transition);
        if !self.held.insert(key.clone()) {
            debug!(key = %key, "Transition already in flight, dropping duplicate");
            return None;
        }
        Some(InFlightPermit {
            guard: self.clone(),
            key: Some(key),
        })
    }

    /// Explicitly clear a triple.
    ///
    /// Returns `true` if it was held. Permits call this on drop; calling it
    /// for a triple whose permit is still alive lets a second caller in.
    pub fn release(&self, kind: RecordKind, identity: &str, transition: &str) -> bool {
        self.held
            .remove(&InFlightKey::new(kind, identity, transition))
            .is_some()
    }

    /// Check if a triple is currently held
    pub fn is_held(&self, kind: RecordKind, identity: &str, transition: &str) -> bool {
        self.held
            .contains(&InFlightKey::new(kind, identity, transition))
    }

    /// Snapshot of all held triples
    pub fn held(&self) -> Vec<InFlightKey> {
        self.held.iter().map(|k| k.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

/// Proof of holding one in-flight triple; releases it on drop
#[derive(Debug)]
pub struct InFlightPermit {
    guard: InFlightGuard,
    key: Option<InFlightKey>,
}

impl InFlightPermit {
    pub fn key(&self) -> Option<&InFlightKey> {
        self.key.as_ref()
    }

    /// Release now instead of at end of scope
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(key) = self.key.take() {
            self.guard.held.remove(&key);
        }
    }
}

impl Drop for InFlightPermit {
    fn drop(&mut self) {
        self.release_inner();
    }
}
