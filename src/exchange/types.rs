//! Exchange Core Types
//!
//! Type definitions shared by the policy, guard, scanner and orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use utoipa::ToSchema;

use super::state::StateTag;

/// Raw record as returned by the agent (opaque JSON object)
pub type RawRecord = Value;

/// Kind of long-running remote exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    /// DIDComm connection establishment
    Connection,
    /// Credential issuance exchange
    Credential,
    /// Proof presentation exchange
    Presentation,
}

impl RecordKind {
    pub const ALL: [RecordKind; 3] = [
        RecordKind::Connection,
        RecordKind::Credential,
        RecordKind::Presentation,
    ];

    /// Get human-readable name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Connection => "connection",
            RecordKind::Credential => "credential",
            RecordKind::Presentation => "presentation",
        }
    }

    /// JSON field carrying the record identity
    pub fn identity_field(&self) -> &'static str {
        match self {
            RecordKind::Connection => "connection_id",
            RecordKind::Credential => "cred_ex_id",
            RecordKind::Presentation => "pres_ex_id",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RecordKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" | "connections" => Ok(RecordKind::Connection),
            "credential" | "credentials" | "credential-exchange" | "credential-exchanges" => {
                Ok(RecordKind::Credential)
            }
            "presentation" | "presentations" | "proof" | "proofs" => Ok(RecordKind::Presentation),
            other => Err(format!("unknown record kind: {}", other)),
        }
    }
}

/// Normalized view of one remote exchange record
///
/// Owned by the orchestrator for one snapshot cycle; replaced wholesale on
/// the next successful fetch.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ExchangeRecord {
    /// Stable identity across snapshots (`connection_id`, `cred_ex_id`, `pres_ex_id`)
    pub identity: String,
    pub kind: RecordKind,
    /// Canonical state tag
    #[schema(value_type = String, example = "offer_received")]
    pub state: StateTag,
    pub connection_id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Untouched agent payload
    #[schema(value_type = Object)]
    pub raw: RawRecord,
}

impl ExchangeRecord {
    /// Build a record directly (tests, fixtures)
    pub fn new(kind: RecordKind, identity: impl Into<String>, state: &str) -> Self {
        Self {
            identity: identity.into(),
            kind,
            state: StateTag::new(state),
            connection_id: None,
            updated_at: None,
            raw: Value::Null,
        }
    }

    /// Normalize a raw agent record.
    ///
    /// Returns `None` when the identity field is missing or empty.
    pub fn from_raw(kind: RecordKind, raw: RawRecord) -> Option<Self> {
        let identity = str_field(&raw, kind.identity_field())?.to_string();
        if identity.is_empty() {
            return None;
        }

        let state = str_field(&raw, "state")
            .or_else(|| match kind {
                RecordKind::Connection => str_field(&raw, "rfc23_state"),
                _ => None,
            })
            .map(StateTag::new)
            .unwrap_or_else(|| StateTag::new(""));

        let connection_id = match kind {
            RecordKind::Connection => Some(identity.clone()),
            _ => str_field(&raw, "connection_id").map(str::to_string),
        };

        let updated_at = str_field(&raw, "updated_at").and_then(parse_timestamp);

        Some(Self {
            identity,
            kind,
            state,
            connection_id,
            updated_at,
            raw,
        })
    }
}

fn str_field<'a>(raw: &'a Value, field: &str) -> Option<&'a str> {
    raw.get(field).and_then(Value::as_str)
}

/// Parse an agent timestamp.
///
/// Accepts RFC 3339 and the agent's `YYYY-MM-DD HH:MM:SS[.ffffff]Z` form.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = s.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Normalize a raw snapshot list into records.
///
/// Records without identity are skipped; on duplicate identities the first
/// occurrence wins.
pub fn normalize_snapshot(kind: RecordKind, raw: Vec<RawRecord>) -> Vec<ExchangeRecord> {
    let mut seen = std::collections::HashSet::with_capacity(raw.len());
    let mut records = Vec::with_capacity(raw.len());

    for item in raw {
        let Some(record) = ExchangeRecord::from_raw(kind, item) else {
            warn!(kind = %kind, "Skipping raw record without identity");
            continue;
        };
        if !seen.insert(record.identity.clone()) {
            warn!(kind = %kind, identity = %record.identity, "Duplicate identity in snapshot");
            continue;
        }
        records.push(record);
    }

    records
}

/// Identity of a record across kinds
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub identity: String,
}

impl RecordKey {
    pub fn new(kind: RecordKind, identity: impl Into<String>) -> Self {
        Self {
            kind,
            identity: identity.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.identity)
    }
}

/// Successful result of an invoke
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TransitionOutcome {
    /// Remote action ran and succeeded
    Completed { response: Value },
    /// Same transition already in flight for this record; nothing was sent
    Dropped,
}

impl TransitionOutcome {
    #[inline]
    pub fn is_completed(&self) -> bool {
        matches!(self, TransitionOutcome::Completed { .. })
    }

    #[inline]
    pub fn is_dropped(&self) -> bool {
        matches!(self, TransitionOutcome::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_parse_aliases() {
        assert_eq!("connections".parse::<RecordKind>(), Ok(RecordKind::Connection));
        assert_eq!("credential-exchange".parse::<RecordKind>(), Ok(RecordKind::Credential));
        assert_eq!("Proofs".parse::<RecordKind>(), Ok(RecordKind::Presentation));
        assert!("schemas".parse::<RecordKind>().is_err());
    }

    #[test]
    fn test_from_raw_credential() {
        let raw = json!({
            "cred_ex_id": "cx-1",
            "state": "offer-received",
            "connection_id": "conn-9",
            "updated_at": "2024-03-01 10:20:30.123456Z",
        });

        let record = ExchangeRecord::from_raw(RecordKind::Credential, raw).unwrap();
        assert_eq!(record.identity, "cx-1");
        assert_eq!(record.state.as_str(), "offer_received");
        assert_eq!(record.connection_id.as_deref(), Some("conn-9"));
        assert!(record.updated_at.is_some());
    }

    #[test]
    fn test_from_raw_connection_falls_back_to_rfc23_state() {
        let raw = json!({ "connection_id": "c-1", "rfc23_state": "request-received" });
        let record = ExchangeRecord::from_raw(RecordKind::Connection, raw).unwrap();
        assert_eq!(record.state.as_str(), "request_received");
        assert_eq!(record.connection_id.as_deref(), Some("c-1"));
    }

    #[test]
    fn test_from_raw_without_identity() {
        let raw = json!({ "state": "done" });
        assert!(ExchangeRecord::from_raw(RecordKind::Presentation, raw).is_none());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2024-03-01T10:20:30Z").is_some());
        assert!(parse_timestamp("2024-03-01 10:20:30Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_normalize_snapshot_dedups_and_skips() {
        let raw = vec![
            json!({ "pres_ex_id": "px-1", "state": "request_sent" }),
            json!({ "state": "done" }),
            json!({ "pres_ex_id": "px-1", "state": "done" }),
            json!({ "pres_ex_id": "px-2", "state": "done" }),
        ];
        let records = normalize_snapshot(RecordKind::Presentation, raw);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state.as_str(), "request_sent");
        assert_eq!(records[1].identity, "px-2");
    }
}
