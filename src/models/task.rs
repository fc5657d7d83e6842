//! Task model: one exercise executed by the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One unit of work: a single exercise for a single language.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Database identifier.
    pub id: i64,
    /// Owning run.
    pub run_id: i64,
    /// Exercise language (directory under the exercises root).
    pub language: String,
    /// Exercise identifier (directory under the language directory).
    pub exercise: String,
    /// Task-specific settings overriding the run settings.
    pub settings: Option<serde_json::Value>,
    /// Metrics record created when the agent session started.
    pub task_metrics_id: Option<i64>,
    /// Time the agent session started.
    pub started_at: Option<DateTime<Utc>>,
    /// Time the task reached a terminal condition.
    pub finished_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Construct an unsaved task; `id` is assigned on insert.
    #[must_use]
    pub fn new(run_id: i64, language: impl Into<String>, exercise: impl Into<String>) -> Self {
        Self {
            id: 0,
            run_id,
            language: language.into(),
            exercise: exercise.into(),
            settings: None,
            task_metrics_id: None,
            started_at: None,
            finished_at: None,
            created_at: Utc::now(),
        }
    }

    /// Task settings as a JSON map; absent or non-object settings are empty.
    #[must_use]
    pub fn settings_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match &self.settings {
            Some(serde_json::Value::Object(map)) => map.clone(),
            _ => serde_json::Map::new(),
        }
    }
}
