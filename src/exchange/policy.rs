//! Transition Policy
//!
//! Declarative tables mapping `(kind, canonical state)` to the transitions a
//! user or the system may trigger. Lookup is total: an unrecognized state
//! yields no transitions, never an error.
//!
//! ```text
//! connection:   invitation_received ─▶ accept-invitation
//!               request_received    ─▶ accept-request
//!               <any known state>   ─▶ remove-connection
//! credential:   offer_received      ─▶ request-credential
//!               credential_received ─▶ store-credential
//!               credential_issued   ─▶ revoke-credential
//! presentation: request_received    ─▶ send-presentation
//!               presentation_received ─▶ verify-presentation (auto)
//! ```

use serde::Serialize;

use super::state::StateTag;
use super::types::RecordKind;

/// One legal transition, as declared in the policy table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransitionDescriptor {
    /// Transition name, also the remote command name
    pub name: &'static str,
    /// Canonical states in which this transition applies
    #[serde(skip)]
    pub applies_in: &'static [&'static str],
    /// Fired by the orchestrator without a user action
    pub auto_fire: bool,
}

impl TransitionDescriptor {
    /// Check if the transition is legal in `state`
    #[inline]
    pub fn applies_when(&self, state: &StateTag) -> bool {
        self.applies_in.contains(&state.as_str())
    }
}

pub const ACCEPT_INVITATION: &str = "accept-invitation";
pub const ACCEPT_REQUEST: &str = "accept-request";
pub const REMOVE_CONNECTION: &str = "remove-connection";
pub const REQUEST_CREDENTIAL: &str = "request-credential";
pub const STORE_CREDENTIAL: &str = "store-credential";
pub const REVOKE_CREDENTIAL: &str = "revoke-credential";
pub const SEND_PRESENTATION: &str = "send-presentation";
pub const VERIFY_PRESENTATION: &str = "verify-presentation";

const CONNECTION_STATES: &[&str] = &[
    "start",
    "invitation",
    "invitation_sent",
    "invitation_received",
    "request",
    "request_sent",
    "request_received",
    "response",
    "response_sent",
    "response_received",
    "active",
    "completed",
    "abandoned",
    "error",
];

const CONNECTION_TRANSITIONS: &[TransitionDescriptor] = &[
    TransitionDescriptor {
        name: ACCEPT_INVITATION,
        applies_in: &["invitation_received", "invitation"],
        auto_fire: false,
    },
    TransitionDescriptor {
        name: ACCEPT_REQUEST,
        applies_in: &["request_received", "request"],
        auto_fire: false,
    },
    TransitionDescriptor {
        name: REMOVE_CONNECTION,
        applies_in: CONNECTION_STATES,
        auto_fire: false,
    },
];

const CREDENTIAL_STATES: &[&str] = &[
    "proposal_sent",
    "proposal_received",
    "offer_sent",
    "offer_received",
    "request_sent",
    "request_received",
    "credential_issued",
    "credential_received",
    "done",
    "abandoned",
    "deleted",
    "credential_revoked",
];

const PRESENTATION_STATES: &[&str] = &[
    "proposal_sent",
    "proposal_received",
    "request_sent",
    "request_received",
    "presentation_sent",
    "presentation_received",
    "done",
    "abandoned",
    "deleted",
];

const CREDENTIAL_TRANSITIONS: &[TransitionDescriptor] = &[
    TransitionDescriptor {
        name: REQUEST_CREDENTIAL,
        applies_in: &["offer_received"],
        auto_fire: false,
    },
    TransitionDescriptor {
        name: STORE_CREDENTIAL,
        applies_in: &["credential_received"],
        auto_fire: false,
    },
    // Issuer side; a holder's `done` record is rejected by the agent.
    TransitionDescriptor {
        name: REVOKE_CREDENTIAL,
        applies_in: &["credential_issued", "done"],
        auto_fire: false,
    },
];

const PRESENTATION_TRANSITIONS: &[TransitionDescriptor] = &[
    TransitionDescriptor {
        name: SEND_PRESENTATION,
        applies_in: &["request_received"],
        auto_fire: false,
    },
    TransitionDescriptor {
        name: VERIFY_PRESENTATION,
        applies_in: &["presentation_received"],
        auto_fire: true,
    },
];

/// Stateless policy over the built-in tables
#[derive(Debug, Clone, Copy, Default)]
pub struct TransitionPolicy;

impl TransitionPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Full ordered table for a kind
    pub fn table(&self, kind: RecordKind) -> &'static [TransitionDescriptor] {
        match kind {
            RecordKind::Connection => CONNECTION_TRANSITIONS,
            RecordKind::Credential => CREDENTIAL_TRANSITIONS,
            RecordKind::Presentation => PRESENTATION_TRANSITIONS,
        }
    }

    /// Transitions legal in `state`, in table order
    pub fn legal_transitions(
        &self,
        kind: RecordKind,
        state: &StateTag,
    ) -> Vec<&'static TransitionDescriptor> {
        self.table(kind)
            .iter()
            .filter(|t| t.applies_when(state))
            .collect()
    }

    /// Legal transitions that fire automatically
    pub fn auto_transitions(
        &self,
        kind: RecordKind,
        state: &StateTag,
    ) -> impl Iterator<Item = &'static TransitionDescriptor> {
        let state = state.clone();
        self.table(kind)
            .iter()
            .filter(move |t| t.auto_fire && t.applies_when(&state))
    }

    /// States the agent is known to emit for a kind, actionable or not
    pub fn known_states(&self, kind: RecordKind) -> &'static [&'static str] {
        match kind {
            RecordKind::Connection => CONNECTION_STATES,
            RecordKind::Credential => CREDENTIAL_STATES,
            RecordKind::Presentation => PRESENTATION_STATES,
        }
    }

    pub fn recognizes(&self, kind: RecordKind, state: &StateTag) -> bool {
        self.known_states(kind).contains(&state.as_str())
    }

    /// Look up a descriptor by name regardless of state
    pub fn descriptor(&self, kind: RecordKind, name: &str) -> Option<&'static TransitionDescriptor> {
        self.table(kind).iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(kind: RecordKind, state: &str) -> Vec<&'static str> {
        TransitionPolicy::new()
            .legal_transitions(kind, &StateTag::new(state))
            .into_iter()
            .map(|t| t.name)
            .collect()
    }

    #[test]
    fn test_credential_offer_received() {
        assert_eq!(names(RecordKind::Credential, "offer_received"), vec![REQUEST_CREDENTIAL]);
        assert_eq!(
            names(RecordKind::Credential, "credential_received"),
            vec![STORE_CREDENTIAL]
        );
    }

    #[test]
    fn test_synonym_states_resolve_identically() {
        let policy = TransitionPolicy::new();
        for kind in RecordKind::ALL {
            for (a, b) in [
                ("offer_received", "offer-received"),
                ("presentation_received", "presentation-received"),
                ("request_received", "Request-Received"),
            ] {
                assert_eq!(
                    policy.legal_transitions(kind, &StateTag::new(a)),
                    policy.legal_transitions(kind, &StateTag::new(b)),
                    "{kind}: {a} vs {b}"
                );
            }
        }
    }

    #[test]
    fn test_unknown_state_yields_nothing() {
        for kind in RecordKind::ALL {
            assert!(names(kind, "quantum_entangled").is_empty());
            assert!(names(kind, "").is_empty());
        }
    }

    #[test]
    fn test_only_verify_presentation_auto_fires() {
        let policy = TransitionPolicy::new();
        let auto: Vec<_> = RecordKind::ALL
            .iter()
            .flat_map(|k| policy.table(*k).iter().filter(|t| t.auto_fire))
            .map(|t| t.name)
            .collect();
        assert_eq!(auto, vec![VERIFY_PRESENTATION]);

        let fired: Vec<_> = policy
            .auto_transitions(RecordKind::Presentation, &StateTag::new("presentation-received"))
            .map(|t| t.name)
            .collect();
        assert_eq!(fired, vec![VERIFY_PRESENTATION]);
    }

    #[test]
    fn test_connection_table_order() {
        assert_eq!(
            names(RecordKind::Connection, "invitation-received"),
            vec![ACCEPT_INVITATION, REMOVE_CONNECTION]
        );
        assert_eq!(names(RecordKind::Connection, "active"), vec![REMOVE_CONNECTION]);
    }

    #[test]
    fn test_every_actionable_state_is_known() {
        let policy = TransitionPolicy::new();
        for kind in RecordKind::ALL {
            for t in policy.table(kind) {
                for state in t.applies_in {
                    assert!(policy.recognizes(kind, &StateTag::new(state)), "{kind}: {state}");
                }
            }
        }
        assert!(policy.recognizes(RecordKind::Credential, &StateTag::new("credential-revoked")));
        assert!(!policy.recognizes(RecordKind::Presentation, &StateTag::new("offer_received")));
    }

    #[test]
    fn test_descriptor_lookup() {
        let policy = TransitionPolicy::new();
        assert!(policy.descriptor(RecordKind::Credential, STORE_CREDENTIAL).is_some());
        assert!(policy.descriptor(RecordKind::Credential, VERIFY_PRESENTATION).is_none());
    }
}
