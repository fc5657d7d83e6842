//! Per-invocation session state.

use chrono::{DateTime, Utc};

/// State of one orchestrator invocation.
///
/// Owned by the lifecycle controller and mutated only by the event router,
/// one event at a time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Start of the agent session; reset when the session-started event arrives.
    pub task_started_at: DateTime<Utc>,
    /// Set by the first terminal path.
    pub task_finished_at: Option<DateTime<Utc>>,
    /// Metrics record created for the session.
    pub task_metrics_id: Option<i64>,
    /// Task id assigned by the agent.
    pub remote_task_id: Option<String>,
    /// The connection ended.
    pub client_disconnected: bool,
}

impl SessionState {
    /// Fresh state stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            task_started_at: Utc::now(),
            task_finished_at: None,
            task_metrics_id: None,
            remote_task_id: None,
            client_disconnected: false,
        }
    }

    /// Whether the session finished or the connection ended.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.task_finished_at.is_some() || self.client_disconnected
    }

    /// Milliseconds since the session started.
    #[must_use]
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> i64 {
        (now - self.task_started_at).num_milliseconds().max(0)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
