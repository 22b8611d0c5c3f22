use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::agent::AgentClient;
use crate::exchange::Orchestrator;

/// Gateway application state (shared)
#[derive(Clone)]
pub struct AppState {
    /// Exchange orchestrator (process-wide)
    pub orchestrator: Arc<Orchestrator>,
    /// Agent client for health checks; `None` when running against a non-HTTP source
    pub agent: Option<AgentClient>,
    /// Largest timeout a caller may request for a background task
    pub max_task_timeout: Duration,
    started: Instant,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        agent: Option<AgentClient>,
        max_task_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator,
            agent,
            max_task_timeout,
            started: Instant::now(),
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }
}
