//! Exchange Orchestrator - service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌──────────┐
//! │  Poller  │───▶│ Orchestrator │───▶│  Agent   │
//! └──────────┘    │  (snapshots, │    │ (admin   │
//! ┌──────────┐    │   auto-fire, │    │   API)   │
//! │ Gateway  │───▶│   tasks)     │    │          │
//! └──────────┘    └──────────────┘    └──────────┘
//! ```
//!
//! Usage: `exchange_orchestrator [--env dev] [--port 8080] [--agent-url http://...]`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use exchange_orchestrator::agent::AgentClient;
use exchange_orchestrator::config::AppConfig;
use exchange_orchestrator::exchange::{ExchangePoller, Orchestrator};
use exchange_orchestrator::gateway::{self, AppState};

fn arg_value(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_env() -> String {
    arg_value(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    arg_value(&["--port"]).and_then(|p| p.parse().ok())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut app_config = AppConfig::load(&env).with_context(|| format!("loading {} config", env))?;
    if let Some(url) = arg_value(&["--agent-url"]) {
        app_config.agent.admin_url = url;
    }
    let _log_guard = exchange_orchestrator::logging::init_logging(&app_config);

    tracing::info!(env = %env, build = env!("GIT_HASH"), "Starting Exchange Orchestrator");

    let agent = AgentClient::new(
        &app_config.agent.admin_url,
        app_config.agent.api_key.clone(),
        Duration::from_millis(app_config.agent.request_timeout_ms),
    )
    .context("building agent client")?;

    // Stale-but-available: an agent that is down at startup is not fatal
    match agent.status().await {
        Ok(status) => tracing::info!(
            version = status.version.as_deref().unwrap_or("unknown"),
            label = status.label.as_deref().unwrap_or(""),
            "Agent reachable"
        ),
        Err(e) => tracing::warn!(error = %e, url = agent.base_url(), "Agent not reachable yet"),
    }

    let shared = Arc::new(agent.clone());
    let orchestrator = Arc::new(Orchestrator::new(
        shared.clone(),
        shared,
        app_config.orchestrator_config(),
    ));

    let shutdown = CancellationToken::new();

    let poller_handle = if app_config.poller.enabled {
        let poller = ExchangePoller::new(orchestrator.clone(), app_config.poller_config());
        let poller_shutdown = poller.shutdown_token();
        let parent = shutdown.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            poller_shutdown.cancel();
        });
        Some(poller.spawn())
    } else {
        tracing::info!("Poller disabled; snapshots refresh on demand only");
        None
    };

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            return;
        }
        tracing::info!("Shutdown requested");
        ctrl_c_shutdown.cancel();
    });

    let state = Arc::new(AppState::new(
        orchestrator,
        Some(agent),
        Duration::from_millis(app_config.background.max_timeout_ms),
    ));

    let port = get_port_override().unwrap_or(app_config.gateway.port);
    let served = gateway::run_server(&app_config.gateway.host, port, state, shutdown.clone()).await;

    // Bind failure also stops the poller
    shutdown.cancel();
    if let Some(handle) = poller_handle {
        let _ = handle.await;
    }

    served.context("gateway server")?;
    tracing::info!("Exchange Orchestrator stopped");
    Ok(())
}
