//! Tool error model: one record per tool failure reported by the agent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Append-only record of a failed tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ToolError {
    /// Database identifier.
    pub id: i64,
    /// Task during which the tool failed.
    pub task_id: i64,
    /// Name of the failing tool (e.g. `apply_diff`).
    pub tool_name: String,
    /// Error text reported by the agent.
    pub error: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields required to create a [`ToolError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewToolError {
    /// Task during which the tool failed.
    pub task_id: i64,
    /// Name of the failing tool.
    pub tool_name: String,
    /// Error text reported by the agent.
    pub error: String,
}
