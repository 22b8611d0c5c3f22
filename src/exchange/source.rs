//! Collaborator Boundaries
//!
//! The orchestrator talks to the outside world through two traits:
//! - [`RecordSource`]: snapshot query per record kind
//! - [`ActionExecutor`]: one command per transition name, plus the long
//!   running [`Operation`]s tracked as background tasks
//!
//! Both are opaque and potentially slow. Neither caches.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::error::{ActionError, FetchError};
use super::types::{RawRecord, RecordKind};

/// Snapshot source for remote exchange records
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Source name for logging
    fn name(&self) -> &'static str;

    /// Fetch a fresh list of raw records of one kind
    async fn fetch(&self, kind: RecordKind) -> Result<Vec<RawRecord>, FetchError>;
}

/// Remote action collaborator
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Executor name for logging
    fn name(&self) -> &'static str;

    /// Run one transition against one record.
    ///
    /// Returns the agent's response body on success.
    async fn execute(
        &self,
        kind: RecordKind,
        transition: &str,
        identity: &str,
        params: &Value,
    ) -> Result<Value, ActionError>;

    /// Run a long-running operation.
    ///
    /// Returns a reference to whatever the operation created (exchange id,
    /// invitation id). The future may be dropped mid-flight on timeout.
    async fn dispatch(&self, operation: &Operation) -> Result<String, ActionError>;
}

/// One credential attribute (name/value pair)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CredentialAttribute {
    pub name: String,
    pub value: String,
}

/// Long-running operation started as a background task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum Operation {
    /// Offer a credential over an existing connection
    IssueCredential {
        connection_id: String,
        cred_def_id: String,
        attributes: Vec<CredentialAttribute>,
        #[serde(default)]
        comment: Option<String>,
    },
    /// Send a proof request over an existing connection
    RequestProof {
        connection_id: String,
        #[schema(value_type = Object)]
        presentation_request: Value,
        #[serde(default)]
        comment: Option<String>,
    },
    /// Create an out-of-band invitation
    CreateInvitation {
        #[serde(default)]
        alias: Option<String>,
    },
    /// Accept an out-of-band invitation issued by another agent
    ReceiveInvitation {
        #[schema(value_type = Object)]
        invitation: Value,
    },
}

impl Operation {
    /// Stable label used in task listings and logs
    pub fn label(&self) -> &'static str {
        match self {
            Operation::IssueCredential { .. } => "issue-credential",
            Operation::RequestProof { .. } => "request-proof",
            Operation::CreateInvitation { .. } => "create-invitation",
            Operation::ReceiveInvitation { .. } => "receive-invitation",
        }
    }

    /// Record kind the operation eventually shows up under
    pub fn kind(&self) -> RecordKind {
        match self {
            Operation::IssueCredential { .. } => RecordKind::Credential,
            Operation::RequestProof { .. } => RecordKind::Presentation,
            Operation::CreateInvitation { .. } | Operation::ReceiveInvitation { .. } => {
                RecordKind::Connection
            }
        }
    }

    /// Basic shape validation before anything is dispatched
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Operation::IssueCredential {
                connection_id,
                cred_def_id,
                attributes,
                ..
            } => {
                if connection_id.trim().is_empty() {
                    return Err("connection_id is required".to_string());
                }
                if cred_def_id.trim().is_empty() {
                    return Err("cred_def_id is required".to_string());
                }
                if attributes.is_empty() {
                    return Err("at least one attribute is required".to_string());
                }
                Ok(())
            }
            Operation::RequestProof {
                connection_id,
                presentation_request,
                ..
            } => {
                if connection_id.trim().is_empty() {
                    return Err("connection_id is required".to_string());
                }
                if !presentation_request.is_object() {
                    return Err("presentation_request must be an object".to_string());
                }
                Ok(())
            }
            Operation::CreateInvitation { .. } => Ok(()),
            Operation::ReceiveInvitation { invitation } => {
                if !invitation.is_object() {
                    return Err("invitation must be an object".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Mock collaborator for testing
#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Semaphore, oneshot};

    struct ScriptedFetch {
        result: Result<Vec<RawRecord>, FetchError>,
        gate: Option<oneshot::Receiver<()>>,
    }

    /// Scriptable agent: fetch responses are queued per kind, actions are
    /// counted per `(transition, identity)`.
    #[derive(Default)]
    pub struct MockAgent {
        scripts: Mutex<HashMap<RecordKind, VecDeque<ScriptedFetch>>>,
        standing: Mutex<HashMap<RecordKind, Vec<RawRecord>>>,
        fetch_count: AtomicUsize,
        calls: Mutex<Vec<(String, String)>>,
        failures: Mutex<HashMap<String, usize>>,
        panics: Mutex<Vec<String>>,
        action_gate: Mutex<Option<Arc<Semaphore>>>,
        dispatch_count: AtomicUsize,
        dispatch_delay: Mutex<Option<Duration>>,
        dispatch_fail: AtomicBool,
        dispatch_dropped: Arc<AtomicBool>,
    }

    impl MockAgent {
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot returned whenever no scripted response is queued
        pub fn set_snapshot(&self, kind: RecordKind, records: Vec<RawRecord>) {
            self.standing.lock().unwrap().insert(kind, records);
        }

        pub fn push_snapshot(&self, kind: RecordKind, records: Vec<RawRecord>) {
            self.push(kind, Ok(records), None);
        }

        pub fn push_error(&self, kind: RecordKind, err: FetchError) {
            self.push(kind, Err(err), None);
        }

        /// Queue a snapshot that is only returned once `gate` fires
        pub fn push_gated(
            &self,
            kind: RecordKind,
            records: Vec<RawRecord>,
            gate: oneshot::Receiver<()>,
        ) {
            self.push(kind, Ok(records), Some(gate));
        }

        fn push(
            &self,
            kind: RecordKind,
            result: Result<Vec<RawRecord>, FetchError>,
            gate: Option<oneshot::Receiver<()>>,
        ) {
            self.scripts
                .lock()
                .unwrap()
                .entry(kind)
                .or_default()
                .push_back(ScriptedFetch { result, gate });
        }

        pub fn fetch_count(&self) -> usize {
            self.fetch_count.load(Ordering::SeqCst)
        }

        /// Fail the next `times` calls of any transition on `identity`
        pub fn fail_next(&self, identity: &str, times: usize) {
            self.failures
                .lock()
                .unwrap()
                .insert(identity.to_string(), times);
        }

        pub fn panic_on(&self, identity: &str) {
            self.panics.lock().unwrap().push(identity.to_string());
        }

        /// Block every action until [`MockAgent::release_actions`]
        pub fn hold_actions(&self) {
            *self.action_gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
        }

        pub fn release_actions(&self) {
            if let Some(gate) = self.action_gate.lock().unwrap().take() {
                gate.add_permits(Semaphore::MAX_PERMITS >> 4);
            }
        }

        /// Number of times `transition` reached the agent for `identity`
        pub fn call_count(&self, transition: &str, identity: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, i)| t == transition && i == identity)
                .count()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn set_dispatch_delay(&self, delay: Duration) {
            *self.dispatch_delay.lock().unwrap() = Some(delay);
        }

        pub fn set_dispatch_fail(&self, fail: bool) {
            self.dispatch_fail.store(fail, Ordering::SeqCst);
        }

        pub fn dispatch_count(&self) -> usize {
            self.dispatch_count.load(Ordering::SeqCst)
        }

        /// True once a dispatch future was dropped before finishing
        pub fn dispatch_was_cancelled(&self) -> bool {
            self.dispatch_dropped.load(Ordering::SeqCst)
        }
    }

    struct DropFlag {
        flag: Arc<AtomicBool>,
        armed: bool,
    }

    impl Drop for DropFlag {
        fn drop(&mut self) {
            if self.armed {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[async_trait]
    impl RecordSource for MockAgent {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn fetch(&self, kind: RecordKind) -> Result<Vec<RawRecord>, FetchError> {
            self.fetch_count.fetch_add(1, Ordering::SeqCst);

            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&kind)
                .and_then(VecDeque::pop_front);

            match scripted {
                Some(ScriptedFetch { result, gate }) => {
                    if let Some(gate) = gate {
                        let _ = gate.await;
                    }
                    result
                }
                None => Ok(self
                    .standing
                    .lock()
                    .unwrap()
                    .get(&kind)
                    .cloned()
                    .unwrap_or_default()),
            }
        }
    }

    #[async_trait]
    impl ActionExecutor for MockAgent {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn execute(
            &self,
            _kind: RecordKind,
            transition: &str,
            identity: &str,
            _params: &Value,
        ) -> Result<Value, ActionError> {
            self.calls
                .lock()
                .unwrap()
                .push((transition.to_string(), identity.to_string()));

            let gate = self.action_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                let _permit = gate.acquire().await;
            }

            if self.panics.lock().unwrap().iter().any(|i| i == identity) {
                panic!("mock agent panicked on {identity}");
            }

            {
                let mut failures = self.failures.lock().unwrap();
                if let Some(remaining) = failures.get_mut(identity)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Err(ActionError::Rejected {
                        status: 500,
                        body: format!("mock {transition} failure"),
                    });
                }
            }

            Ok(serde_json::json!({ "identity": identity, "transition": transition }))
        }

        async fn dispatch(&self, operation: &Operation) -> Result<String, ActionError> {
            let n = self.dispatch_count.fetch_add(1, Ordering::SeqCst);
            let mut flag = DropFlag {
                flag: self.dispatch_dropped.clone(),
                armed: true,
            };

            let delay = *self.dispatch_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            flag.armed = false;

            if self.dispatch_fail.load(Ordering::SeqCst) {
                return Err(ActionError::Rejected {
                    status: 400,
                    body: "mock dispatch failure".to_string(),
                });
            }
            Ok(format!("{}-{}", operation.label(), n + 1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_operation_deserialize() {
        let op: Operation = serde_json::from_value(json!({
            "operation": "issue-credential",
            "connection_id": "conn-1",
            "cred_def_id": "Th7M:3:CL:12:default",
            "attributes": [{ "name": "name", "value": "Alice" }]
        }))
        .unwrap();

        assert_eq!(op.label(), "issue-credential");
        assert_eq!(op.kind(), RecordKind::Credential);
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_operation_validation() {
        let op = Operation::IssueCredential {
            connection_id: "conn-1".into(),
            cred_def_id: "".into(),
            attributes: vec![],
            comment: None,
        };
        assert_eq!(op.validate(), Err("cred_def_id is required".to_string()));

        let op = Operation::RequestProof {
            connection_id: "conn-1".into(),
            presentation_request: json!("not an object"),
            comment: None,
        };
        assert!(op.validate().is_err());

        assert!(Operation::CreateInvitation { alias: None }.validate().is_ok());

        let op = Operation::ReceiveInvitation {
            invitation: json!("{\"@type\": \"invitation\"}"),
        };
        assert_eq!(op.validate(), Err("invitation must be an object".to_string()));
    }

    #[test]
    fn test_receive_invitation_deserialize() {
        let op: Operation = serde_json::from_value(json!({
            "operation": "receive-invitation",
            "invitation": {
                "@type": "https://didcomm.org/out-of-band/1.1/invitation",
                "@id": "inv-1",
                "services": ["did:sov:LjgpST2rjsoxYegQDRm7EL"]
            }
        }))
        .unwrap();

        assert_eq!(op.label(), "receive-invitation");
        assert_eq!(op.kind(), RecordKind::Connection);
        assert!(op.validate().is_ok());
    }
}
