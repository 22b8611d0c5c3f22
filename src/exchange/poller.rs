//! Exchange Poller
//!
//! Process-scoped scheduler that refreshes every configured kind on a fixed
//! interval. It lives on the shared runtime, so auto-fire scanning keeps
//! running no matter which client is (or isn't) looking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::orchestrator::Orchestrator;
use super::types::RecordKind;

/// Configuration for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between refresh rounds
    pub interval: Duration,
    /// Kinds refreshed each round
    pub kinds: Vec<RecordKind>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            kinds: RecordKind::ALL.to_vec(),
        }
    }
}

/// Exchange Poller
pub struct ExchangePoller {
    orchestrator: Arc<Orchestrator>,
    config: PollerConfig,
    shutdown: CancellationToken,
}

impl ExchangePoller {
    pub fn new(orchestrator: Arc<Orchestrator>, config: PollerConfig) -> Self {
        Self {
            orchestrator,
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create with default configuration
    pub fn with_defaults(orchestrator: Arc<Orchestrator>) -> Self {
        Self::new(orchestrator, PollerConfig::default())
    }

    /// Token that stops the loop when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Run until the shutdown token fires
    pub async fn run(&self) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            kinds = ?self.config.kinds,
            "Starting exchange poller"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.poll_once() => {}
            }
        }

        info!("Exchange poller stopped");
    }

    /// Refresh every configured kind once. Returns the number that applied.
    pub async fn poll_once(&self) -> usize {
        let mut applied = 0;
        for &kind in &self.config.kinds {
            match self.orchestrator.refresh(kind).await {
                Ok(report) if report.applied => {
                    applied += 1;
                    if !report.auto_fired.is_empty() {
                        debug!(kind = %kind, auto_fired = report.auto_fired.len(), "Poll cycle fired transitions");
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(kind = %kind, error = %e, "Poll refresh failed"),
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::orchestrator::OrchestratorConfig;
    use crate::exchange::scanner::RetryPolicy;
    use crate::exchange::source::mock::MockAgent;
    use crate::exchange::error::FetchError;
    use serde_json::json;

    fn setup() -> (Arc<MockAgent>, Arc<Orchestrator>) {
        let agent = Arc::new(MockAgent::new());
        let orch = Arc::new(Orchestrator::new(
            agent.clone(),
            agent.clone(),
            OrchestratorConfig {
                retry: RetryPolicy::immediate(),
                ..Default::default()
            },
        ));
        (agent, orch)
    }

    #[tokio::test]
    async fn test_poll_once_survives_fetch_errors() {
        let (agent, orch) = setup();
        agent.push_error(RecordKind::Connection, FetchError::Transport("refused".into()));
        agent.set_snapshot(
            RecordKind::Presentation,
            vec![json!({ "pres_ex_id": "px-1", "state": "presentation_received" })],
        );

        let poller = ExchangePoller::with_defaults(orch.clone());
        assert_eq!(poller.poll_once().await, 2);
        assert!(orch.last_error(RecordKind::Connection).is_some());
        assert_eq!(agent.call_count("verify-presentation", "px-1"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_shutdown() {
        let (agent, orch) = setup();
        let poller = ExchangePoller::new(
            orch,
            PollerConfig {
                interval: Duration::from_secs(5),
                kinds: vec![RecordKind::Credential],
            },
        );
        let shutdown = poller.shutdown_token();
        let handle = poller.spawn();

        // First tick fires immediately, then one every 5s
        tokio::time::sleep(Duration::from_millis(12_500)).await;
        assert_eq!(agent.fetch_count(), 3);

        shutdown.cancel();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(agent.fetch_count(), 3);
    }
}
