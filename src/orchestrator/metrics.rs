//! Metrics aggregation for one agent session.
//!
//! The agent reports cumulative totals, so every update overwrites the stored
//! counters instead of adding to them. Totals are assumed never to go
//! backwards within a session.

use crate::models::metrics::{TaskMetrics, TokenUsage, ToolUsage, UsageUpdate};
use crate::persistence::metrics_repo::TaskMetricsRepo;
use crate::Result;

/// Writes session metrics through [`TaskMetricsRepo`].
#[derive(Clone)]
pub struct MetricsAggregator {
    repo: TaskMetricsRepo,
}

impl MetricsAggregator {
    /// Create an aggregator backed by `repo`.
    #[must_use]
    pub fn new(repo: TaskMetricsRepo) -> Self {
        Self { repo }
    }

    /// Create the zeroed record for a new session and return its id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn start(&self) -> Result<i64> {
        let created = self.repo.create(&TaskMetrics::zeroed()).await?;
        Ok(created.id)
    }

    /// Replace the usage counters of `metrics_id` with `usage`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_usage(
        &self,
        metrics_id: i64,
        usage: &TokenUsage,
        duration_ms: i64,
    ) -> Result<()> {
        self.repo
            .update_usage(metrics_id, &UsageUpdate::from_totals(usage, duration_ms))
            .await
    }

    /// Replace the tool usage summary of `metrics_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn record_tool_usage(&self, metrics_id: i64, tool_usage: &ToolUsage) -> Result<()> {
        self.repo.update_tool_usage(metrics_id, tool_usage).await
    }
}
