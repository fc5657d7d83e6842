//! Persistence layer modules.

pub mod db;
pub mod metrics_repo;
pub mod run_repo;
pub mod schema;
pub mod task_repo;
pub mod tool_error_repo;

use chrono::{DateTime, Utc};

use crate::{AppError, Result};

/// Re-export the database pool type for convenience.
pub use sqlx::SqlitePool;

/// Parse an RFC 3339 column value into a UTC timestamp.
pub(crate) fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Db(format!("invalid {column}: {e}")))
}

/// Parse an optional RFC 3339 column value.
pub(crate) fn parse_optional_timestamp(
    column: &str,
    raw: Option<&str>,
) -> Result<Option<DateTime<Utc>>> {
    raw.map(|value| parse_timestamp(column, value)).transpose()
}
