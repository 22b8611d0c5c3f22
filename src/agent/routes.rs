//! Admin API route table
//!
//! Pure mapping from record kinds, transitions and operations to admin API
//! requests, plus response unwrapping. No I/O here.

use reqwest::Method;
use serde_json::{Map, Value, json};

use crate::exchange::policy::{
    ACCEPT_INVITATION, ACCEPT_REQUEST, REMOVE_CONNECTION, REQUEST_CREDENTIAL, REVOKE_CREDENTIAL,
    SEND_PRESENTATION, STORE_CREDENTIAL, VERIFY_PRESENTATION,
};
use crate::exchange::{ActionError, FetchError, Operation, RawRecord, RecordKind};

/// Handshake protocol offered on new invitations
pub const DIDEXCHANGE_PROTOCOL: &str = "https://didcomm.org/didexchange/1.1";

const CREDENTIAL_PREVIEW_TYPE: &str = "issue-credential/2.0/credential-preview";

/// One admin API call
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl AgentRequest {
    fn post(path: String, body: Value) -> Self {
        Self {
            method: Method::POST,
            path,
            query: Vec::new(),
            body: Some(body),
        }
    }
}

/// Snapshot listing endpoint for a kind
pub fn list_path(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Connection => "/connections",
        RecordKind::Credential => "/issue-credential-2.0/records",
        RecordKind::Presentation => "/present-proof-2.0/records",
    }
}

/// Build the request for one transition
pub fn transition_request(
    kind: RecordKind,
    transition: &str,
    identity: &str,
    params: &Value,
) -> Result<AgentRequest, ActionError> {
    let id = urlencoding::encode(identity);
    let request = match (kind, transition) {
        (RecordKind::Connection, ACCEPT_INVITATION) | (RecordKind::Connection, ACCEPT_REQUEST) => {
            AgentRequest {
                method: Method::POST,
                path: format!("/didexchange/{}/{}", id, transition),
                query: query_pairs(params),
                body: None,
            }
        }
        (RecordKind::Connection, REMOVE_CONNECTION) => AgentRequest {
            method: Method::DELETE,
            path: format!("/connections/{}", id),
            query: Vec::new(),
            body: None,
        },
        (RecordKind::Credential, REQUEST_CREDENTIAL) => AgentRequest::post(
            format!("/issue-credential-2.0/records/{}/send-request", id),
            object_or_empty(params),
        ),
        (RecordKind::Credential, STORE_CREDENTIAL) => AgentRequest::post(
            format!("/issue-credential-2.0/records/{}/store", id),
            object_or_empty(params),
        ),
        (RecordKind::Credential, REVOKE_CREDENTIAL) => {
            let mut body = Map::new();
            body.insert("cred_ex_id".into(), Value::String(identity.to_string()));
            body.insert("publish".into(), Value::Bool(true));
            if let Value::Object(extra) = params {
                body.extend(extra.clone());
            }
            AgentRequest::post("/revocation/revoke".to_string(), Value::Object(body))
        }
        (RecordKind::Presentation, SEND_PRESENTATION) => AgentRequest::post(
            format!("/present-proof-2.0/records/{}/send-presentation", id),
            object_or_empty(params),
        ),
        (RecordKind::Presentation, VERIFY_PRESENTATION) => AgentRequest::post(
            format!("/present-proof-2.0/records/{}/verify-presentation", id),
            object_or_empty(params),
        ),
        _ => {
            return Err(ActionError::Unsupported {
                kind,
                transition: transition.to_string(),
            });
        }
    };
    Ok(request)
}

/// Build the request for a background operation, with the response field
/// carrying its result reference
pub fn operation_request(operation: &Operation) -> (AgentRequest, &'static str) {
    match operation {
        Operation::IssueCredential {
            connection_id,
            cred_def_id,
            attributes,
            comment,
        } => {
            let body = json!({
                "connection_id": connection_id,
                "comment": comment,
                "auto_remove": false,
                "credential_preview": {
                    "@type": CREDENTIAL_PREVIEW_TYPE,
                    "attributes": attributes,
                },
                "filter": { "indy": { "cred_def_id": cred_def_id } },
            });
            (
                AgentRequest::post("/issue-credential-2.0/send-offer".to_string(), body),
                "cred_ex_id",
            )
        }
        Operation::RequestProof {
            connection_id,
            presentation_request,
            comment,
        } => {
            let body = json!({
                "connection_id": connection_id,
                "comment": comment,
                "presentation_request": presentation_request,
            });
            (
                AgentRequest::post("/present-proof-2.0/send-request".to_string(), body),
                "pres_ex_id",
            )
        }
        Operation::CreateInvitation { alias } => {
            let body = json!({
                "alias": alias,
                "handshake_protocols": [DIDEXCHANGE_PROTOCOL],
                "use_public_did": false,
            });
            (
                AgentRequest::post("/out-of-band/create-invitation".to_string(), body),
                "invi_msg_id",
            )
        }
        Operation::ReceiveInvitation { invitation } => (
            AgentRequest::post(
                "/out-of-band/receive-invitation".to_string(),
                invitation.clone(),
            ),
            "connection_id",
        ),
    }
}

/// Pull the record list out of a `{"results": [...]}` listing.
///
/// Credential entries wrapped as `{"cred_ex_record": {...}}` are unwrapped.
pub fn unwrap_listing(kind: RecordKind, body: Value) -> Result<Vec<RawRecord>, FetchError> {
    let Value::Object(mut map) = body else {
        return Err(FetchError::Malformed("listing is not a JSON object".to_string()));
    };
    let results = match map.remove("results") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(FetchError::Malformed("results is not an array".to_string())),
        None => return Err(FetchError::Malformed("missing results".to_string())),
    };

    Ok(results
        .into_iter()
        .map(|item| match (kind, item) {
            (RecordKind::Credential, Value::Object(mut wrapper))
                if wrapper.contains_key("cred_ex_record") =>
            {
                wrapper.remove("cred_ex_record").unwrap_or(Value::Null)
            }
            (_, item) => item,
        })
        .collect())
}

/// Read the result reference of an operation response
pub fn result_ref(body: &Value, field: &str) -> Result<String, ActionError> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ActionError::Malformed(format!("response has no {}", field)))
}

fn object_or_empty(params: &Value) -> Value {
    match params {
        Value::Object(_) => params.clone(),
        _ => json!({}),
    }
}

fn query_pairs(params: &Value) -> Vec<(String, String)> {
    let Value::Object(map) = params else {
        return Vec::new();
    };
    map.iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k.clone(), s.clone())),
            Value::Bool(_) | Value::Number(_) => Some((k.clone(), v.to_string())),
            _ => None,
        })
        .collect()
}
