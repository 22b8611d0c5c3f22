//! Admin API client
//!
//! One `reqwest::Client` shared by snapshot fetches, transitions and
//! background operations.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use super::routes::{self, AgentRequest};
use crate::exchange::{
    ActionError, ActionExecutor, FetchError, Operation, RawRecord, RecordKind, RecordSource,
};

/// Agent client setup errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to create HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Subset of `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AgentStatus {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Admin API client
#[derive(Debug, Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl AgentClient {
    /// Create a client for `base_url`.
    ///
    /// `request_timeout` bounds snapshot fetches and transitions. Background
    /// operations are bounded by their task timeout instead.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let client = Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        info!(base_url, timeout_ms = request_timeout.as_millis() as u64, "Agent client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn builder(&self, request: &AgentRequest) -> RequestBuilder {
        let mut builder = self
            .client
            .request(request.method.clone(), format!("{}{}", self.base_url, request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }
        builder
    }

    /// `GET /status`
    pub async fn status(&self) -> Result<AgentStatus, FetchError> {
        let request = AgentRequest {
            method: reqwest::Method::GET,
            path: "/status".to_string(),
            query: Vec::new(),
            body: None,
        };
        let response = self
            .builder(&request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let body = read_fetch(response).await?;
        serde_json::from_value(body).map_err(|e| FetchError::Malformed(e.to_string()))
    }

    async fn call(&self, request: &AgentRequest, timeout: Option<Duration>) -> Result<Value, ActionError> {
        debug!(method = %request.method, path = %request.path, "Agent call");
        let mut builder = self.builder(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ActionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(path = %request.path, status = status.as_u16(), "Agent rejected call");
            return Err(ActionError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| ActionError::Malformed(e.to_string()))
    }
}

async fn read_fetch(response: Response) -> Result<Value, FetchError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| FetchError::Transport(e.to_string()))?;
    if !status.is_success() {
        return Err(FetchError::Status {
            status: status.as_u16(),
            body: text,
        });
    }
    serde_json::from_str(&text).map_err(|e| FetchError::Malformed(e.to_string()))
}

#[async_trait]
impl RecordSource for AgentClient {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn fetch(&self, kind: RecordKind) -> Result<Vec<RawRecord>, FetchError> {
        let request = AgentRequest {
            method: reqwest::Method::GET,
            path: routes::list_path(kind).to_string(),
            query: Vec::new(),
            body: None,
        };
        let response = self
            .builder(&request)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let body = read_fetch(response).await?;
        routes::unwrap_listing(kind, body)
    }
}

#[async_trait]
impl ActionExecutor for AgentClient {
    fn name(&self) -> &'static str {
        "agent"
    }

    async fn execute(
        &self,
        kind: RecordKind,
        transition: &str,
        identity: &str,
        params: &Value,
    ) -> Result<Value, ActionError> {
        let request = routes::transition_request(kind, transition, identity, params)?;
        self.call(&request, Some(self.request_timeout)).await
    }

    async fn dispatch(&self, operation: &Operation) -> Result<String, ActionError> {
        let (request, field) = routes::operation_request(operation);
        let body = self.call(&request, None).await?;
        routes::result_ref(&body, field)
    }
}
