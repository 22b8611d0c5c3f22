use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use thiserror::Error;

use crate::exchange::{OrchestratorConfig, PollerConfig, RecordKind, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config yaml: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub poller: PollerSettings,
    #[serde(default)]
    pub auto_fire: AutoFireConfig,
    #[serde(default)]
    pub background: BackgroundConfig,
}

/// Admin API of the agent this instance drives
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AgentConfig {
    pub admin_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Bound for snapshot fetches and transitions
    pub request_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            admin_url: "http://localhost:8021".to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollerSettings {
    pub enabled: bool,
    pub interval_ms: u64,
    pub kinds: Vec<RecordKind>,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 5_000,
            kinds: RecordKind::ALL.to_vec(),
        }
    }
}

/// Auto-fire retry policy. `max_attempts: null` retries forever.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AutoFireConfig {
    pub enabled: bool,
    pub max_attempts: Option<u32>,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for AutoFireConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(5),
            base_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackgroundConfig {
    /// Timeout for tasks started without one
    pub default_timeout_ms: u64,
    /// Upper bound a caller may request
    pub max_timeout_ms: u64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 600_000,
            max_timeout_ms: 3_600_000,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Result<Self, ConfigError> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path).map_err(|source| ConfigError::Read {
            path: config_path.clone(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.admin_url.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.admin_url is empty".to_string()));
        }
        if self.poller.interval_ms == 0 {
            return Err(ConfigError::Invalid("poller.interval_ms must be > 0".to_string()));
        }
        if self.background.default_timeout_ms == 0
            || self.background.default_timeout_ms > self.background.max_timeout_ms
        {
            return Err(ConfigError::Invalid(
                "background.default_timeout_ms must be in 1..=max_timeout_ms".to_string(),
            ));
        }
        if self.auto_fire.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "auto_fire.max_attempts must be > 0 or null".to_string(),
            ));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.auto_fire.max_attempts,
            base_backoff: Duration::from_millis(self.auto_fire.base_backoff_ms),
            max_backoff: Duration::from_millis(self.auto_fire.max_backoff_ms),
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            auto_fire: self.auto_fire.enabled,
            retry: self.retry_policy(),
            task_timeout: Duration::from_millis(self.background.default_timeout_ms),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            interval: Duration::from_millis(self.poller.interval_ms),
            kinds: self.poller.kinds.clone(),
        }
    }
}
