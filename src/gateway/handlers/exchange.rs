//! Exchange handlers: projection, refresh, transitions

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
};
use serde_json::Value;

use super::super::state::AppState;
use super::super::types::{ApiError, ApiResult, InvokeResponse, ok};
use crate::exchange::{Projection, RecordKind, RefreshReport};

fn parse_kind(kind: &str) -> Result<RecordKind, ApiError> {
    kind.parse::<RecordKind>().map_err(ApiError::bad_request)
}

/// Empty body → `{}`; anything else must be a JSON object
fn parse_params(body: &Bytes) -> Result<Value, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    let params: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {}", e)))?;
    if !params.is_object() {
        return Err(ApiError::bad_request("Body must be a JSON object"));
    }
    Ok(params)
}

/// Records of a kind with their legal actions
///
/// GET /api/v1/exchanges/{kind}
#[utoipa::path(
    get,
    path = "/api/v1/exchanges/{kind}",
    params(("kind" = String, Path, description = "connection | credential | presentation")),
    responses(
        (status = 200, description = "Latest snapshot projection", body = Projection, content_type = "application/json"),
        (status = 400, description = "Unknown kind")
    ),
    tag = "Exchanges"
)]
pub async fn get_projection(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> ApiResult<Projection> {
    let kind = parse_kind(&kind)?;
    ok(state.orchestrator.projection(kind))
}

/// Pull a fresh snapshot now
///
/// POST /api/v1/exchanges/{kind}/refresh
#[utoipa::path(
    post,
    path = "/api/v1/exchanges/{kind}/refresh",
    params(("kind" = String, Path, description = "connection | credential | presentation")),
    responses(
        (status = 200, description = "Refresh report", body = RefreshReport, content_type = "application/json"),
        (status = 400, description = "Unknown kind"),
        (status = 503, description = "Agent fetch failed; last snapshot kept")
    ),
    tag = "Exchanges"
)]
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(kind): Path<String>,
) -> ApiResult<RefreshReport> {
    let kind = parse_kind(&kind)?;
    let report = state.orchestrator.refresh(kind).await?;
    ok(report)
}

/// Run one transition on one record
///
/// The optional JSON object body is forwarded to the agent as parameters.
///
/// POST /api/v1/exchanges/{kind}/{identity}/{transition}
#[utoipa::path(
    post,
    path = "/api/v1/exchanges/{kind}/{identity}/{transition}",
    params(
        ("kind" = String, Path, description = "connection | credential | presentation"),
        ("identity" = String, Path, description = "Record identity"),
        ("transition" = String, Path, description = "Transition name, e.g. store-credential")
    ),
    request_body(
        content = serde_json::Value,
        description = "Optional JSON object forwarded to the agent as parameters",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Completed or dropped", body = InvokeResponse, content_type = "application/json"),
        (status = 400, description = "Unknown kind or transition"),
        (status = 404, description = "Record not in the latest snapshot"),
        (status = 409, description = "Transition not legal in the record's state"),
        (status = 502, description = "Agent rejected the transition")
    ),
    tag = "Exchanges"
)]
pub async fn invoke(
    State(state): State<Arc<AppState>>,
    Path((kind, identity, transition)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<InvokeResponse> {
    let kind = parse_kind(&kind)?;
    let params = parse_params(&body)?;
    let outcome = state
        .orchestrator
        .invoke(kind, &identity, &transition, &params)
        .await?;
    ok(outcome.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_params() {
        assert_eq!(parse_params(&Bytes::new()).unwrap(), serde_json::json!({}));
        assert_eq!(
            parse_params(&Bytes::from_static(br#"{"publish":false}"#)).unwrap(),
            serde_json::json!({ "publish": false })
        );
        assert!(parse_params(&Bytes::from_static(b"[1]")).is_err());
        assert!(parse_params(&Bytes::from_static(b"{oops")).is_err());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("proofs").unwrap(), RecordKind::Presentation);
        assert!(parse_kind("schemas").is_err());
    }
}
