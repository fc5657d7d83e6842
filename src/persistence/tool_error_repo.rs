//! Tool error repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::tool_error::{NewToolError, ToolError};
use crate::Result;

use super::db::Database;
use super::parse_timestamp;

/// Repository wrapper around `SQLite` for tool error records.
#[derive(Clone)]
pub struct ToolErrorRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct ToolErrorRow {
    id: i64,
    task_id: i64,
    tool_name: String,
    error: String,
    created_at: String,
}

impl ToolErrorRow {
    fn into_tool_error(self) -> Result<ToolError> {
        Ok(ToolError {
            id: self.id,
            task_id: self.task_id,
            tool_name: self.tool_name,
            error: self.error,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl ToolErrorRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a tool error record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, new: &NewToolError) -> Result<ToolError> {
        let created_at = Utc::now();

        let id = sqlx::query(
            "INSERT INTO tool_error (task_id, tool_name, error, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(new.task_id)
        .bind(&new.tool_name)
        .bind(&new.error)
        .bind(created_at.to_rfc3339())
        .execute(self.db.as_ref())
        .await?
        .last_insert_rowid();

        Ok(ToolError {
            id,
            task_id: new.task_id,
            tool_name: new.tool_name.clone(),
            error: new.error.clone(),
            created_at,
        })
    }

    /// List tool errors for a task in insertion order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_task(&self, task_id: i64) -> Result<Vec<ToolError>> {
        let rows: Vec<ToolErrorRow> =
            sqlx::query_as("SELECT * FROM tool_error WHERE task_id = ?1 ORDER BY id")
                .bind(task_id)
                .fetch_all(self.db.as_ref())
                .await?;

        rows.into_iter().map(ToolErrorRow::into_tool_error).collect()
    }
}
