//! Task metrics repository for `SQLite` persistence.

use std::sync::Arc;

use crate::models::metrics::{TaskMetrics, ToolUsage, UsageUpdate};
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository wrapper around `SQLite` for task metrics records.
#[derive(Clone)]
pub struct TaskMetricsRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct TaskMetricsRow {
    id: i64,
    cost: f64,
    tokens_in: i64,
    tokens_out: i64,
    tokens_context: i64,
    duration: i64,
    cache_writes: i64,
    cache_reads: i64,
    tool_usage: String,
    created_at: String,
}

impl TaskMetricsRow {
    fn into_metrics(self) -> Result<TaskMetrics> {
        let tool_usage = serde_json::from_str(&self.tool_usage)
            .map_err(|e| AppError::Db(format!("invalid tool_usage: {e}")))?;

        Ok(TaskMetrics {
            id: self.id,
            cost: self.cost,
            tokens_in: self.tokens_in,
            tokens_out: self.tokens_out,
            tokens_context: self.tokens_context,
            duration: self.duration,
            cache_writes: self.cache_writes,
            cache_reads: self.cache_reads,
            tool_usage,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

fn tool_usage_json(tool_usage: &ToolUsage) -> Result<String> {
    serde_json::to_string(tool_usage).map_err(|e| AppError::Db(format!("serialize tool_usage: {e}")))
}

impl TaskMetricsRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a metrics record; the returned copy carries the assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, metrics: &TaskMetrics) -> Result<TaskMetrics> {
        let id = sqlx::query(
            "INSERT INTO task_metrics (cost, tokens_in, tokens_out, tokens_context,
             duration, cache_writes, cache_reads, tool_usage, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(metrics.cost)
        .bind(metrics.tokens_in)
        .bind(metrics.tokens_out)
        .bind(metrics.tokens_context)
        .bind(metrics.duration)
        .bind(metrics.cache_writes)
        .bind(metrics.cache_reads)
        .bind(tool_usage_json(&metrics.tool_usage)?)
        .bind(metrics.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        Ok(TaskMetrics {
            id,
            ..metrics.clone()
        })
    }

    /// Retrieve a metrics record by identifier.
    ///
    /// Returns `Ok(None)` if the record does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<TaskMetrics>> {
        let row: Option<TaskMetricsRow> =
            sqlx::query_as("SELECT * FROM task_metrics WHERE id = ?1")
                .bind(id)
                .fetch_optional(self.db.as_ref())
                .await?;

        row.map(TaskMetricsRow::into_metrics).transpose()
    }

    /// Count all metrics records.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count(&self) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM task_metrics")
            .fetch_one(self.db.as_ref())
            .await?;
        Ok(count)
    }

    /// Overwrite the usage counters with the latest cumulative totals.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_usage(&self, id: i64, update: &UsageUpdate) -> Result<()> {
        sqlx::query(
            "UPDATE task_metrics SET cost = ?1, tokens_in = ?2, tokens_out = ?3,
             tokens_context = ?4, duration = ?5, cache_writes = ?6, cache_reads = ?7
             WHERE id = ?8",
        )
        .bind(update.cost)
        .bind(update.tokens_in)
        .bind(update.tokens_out)
        .bind(update.tokens_context)
        .bind(update.duration)
        .bind(update.cache_writes)
        .bind(update.cache_reads)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// Replace the tool usage summary.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn update_tool_usage(&self, id: i64, tool_usage: &ToolUsage) -> Result<()> {
        sqlx::query("UPDATE task_metrics SET tool_usage = ?1 WHERE id = ?2")
            .bind(tool_usage_json(tool_usage)?)
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }
}
