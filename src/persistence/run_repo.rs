//! Run repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::run::Run;
use crate::{AppError, Result};

use super::db::Database;
use super::parse_timestamp;

/// Repository wrapper around `SQLite` for run records.
#[derive(Clone)]
pub struct RunRepo {
    db: Arc<Database>,
}

#[derive(sqlx::FromRow)]
struct RunRow {
    id: i64,
    settings: String,
    created_at: String,
}

impl RunRow {
    fn into_run(self) -> Result<Run> {
        let settings = serde_json::from_str(&self.settings)
            .map_err(|e| AppError::Db(format!("invalid run settings: {e}")))?;
        Ok(Run {
            id: self.id,
            settings,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

impl RunRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a run with the given settings object.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn create(&self, settings: &serde_json::Value) -> Result<Run> {
        let created_at = Utc::now();
        let settings_json = serde_json::to_string(settings)
            .map_err(|e| AppError::Db(format!("serialize run settings: {e}")))?;

        let id = sqlx::query("INSERT INTO run (settings, created_at) VALUES (?1, ?2)")
            .bind(&settings_json)
            .bind(created_at.to_rfc3339())
            .execute(self.db.as_ref())
            .await?
            .last_insert_rowid();

        Ok(Run {
            id,
            settings: settings.clone(),
            created_at,
        })
    }

    /// Retrieve a run by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the run does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<Run> {
        let row: Option<RunRow> = sqlx::query_as("SELECT * FROM run WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.ok_or_else(|| AppError::NotFound(format!("run {id} not found")))?
            .into_run()
    }
}
