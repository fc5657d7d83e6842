//! Run model: a batch of tasks sharing one settings object.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A batch execution whose settings are merged into every task's configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Run {
    /// Database identifier.
    pub id: i64,
    /// Agent settings shared by every task of the run (JSON object).
    pub settings: serde_json::Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Run {
    /// Settings as a JSON map; non-object settings are treated as empty.
    #[must_use]
    pub fn settings_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match &self.settings {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        }
    }
}
