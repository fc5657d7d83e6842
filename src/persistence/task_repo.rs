//! Task repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::models::task::Task;
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for task records.
#[derive(Clone)]
pub struct TaskRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    run_id: i64,
    language: String,
    exercise: String,
    settings: Option<String>,
    task_metrics_id: Option<i64>,
    started_at: Option<String>,
    finished_at: Option<String>,
    created_at: String,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        let settings = self
            .settings
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid task settings: {e}")))?;

        Ok(Task {
            id: self.id,
            run_id: self.run_id,
            language: self.language,
            exercise: self.exercise,
            settings,
            task_metrics_id: self.task_metrics_id,
            started_at: parse_optional_timestamp("started_at", self.started_at.as_deref())?,
            finished_at: parse_optional_timestamp("finished_at", self.finished_at.as_deref())?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl TaskRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a task; the returned copy carries the assigned identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, task: &Task) -> Result<Task> {
        let settings = task
            .settings
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| AppError::Db(format!("serialize task settings: {e}")))?;

        let id = sqlx::query(
            "INSERT INTO task (run_id, language, exercise, settings, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(task.run_id)
        .bind(&task.language)
        .bind(&task.exercise)
        .bind(&settings)
        .bind(task.created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        Ok(Task {
            id,
            ..task.clone()
        })
    }

    /// Retrieve a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the task does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<Task> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM task WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("task {id} not found")))?
            .into_task()
    }

    /// Link the task to its metrics record and stamp the session start.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_started(
        &self,
        id: i64,
        task_metrics_id: i64,
        started_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query("UPDATE task SET task_metrics_id = ?1, started_at = ?2 WHERE id = ?3")
            .bind(task_metrics_id)
            .bind(started_at.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }

    /// Stamp the time the task reached its terminal condition.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn mark_finished(&self, id: i64, finished_at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE task SET finished_at = ?1 WHERE id = ?2")
            .bind(finished_at.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;

        Ok(())
    }
}
