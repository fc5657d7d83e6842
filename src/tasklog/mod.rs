//! Per-task structured log.
//!
//! Every task gets its own JSONL file recording lifecycle phases and the
//! agent events worth keeping. [`JsonlTaskLogger`] is the file-backed
//! implementation.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a task log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskLogLevel {
    /// Routine progress.
    Info,
    /// Unexpected but recoverable condition.
    Warn,
    /// Failure.
    Error,
}

/// A single line in a task log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskLogEntry {
    /// Time the entry was created.
    pub timestamp: DateTime<Utc>,
    /// Local task identifier.
    pub task_id: i64,
    /// Severity.
    pub level: TaskLogLevel,
    /// Human-readable message.
    pub message: String,
    /// Agent event name, for entries recording an event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    /// Agent event payload, for entries recording an event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl TaskLogEntry {
    /// Construct an entry without event details.
    #[must_use]
    pub fn new(task_id: i64, level: TaskLogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            task_id,
            level,
            message: message.into(),
            event_name: None,
            payload: None,
        }
    }

    /// Attach an agent event to this entry.
    #[must_use]
    pub fn with_event(mut self, event_name: &str, payload: serde_json::Value) -> Self {
        self.event_name = Some(event_name.to_owned());
        self.payload = Some(payload);
        self
    }
}

/// Writes task log entries to a persistent store.
///
/// Implementations must be [`Send`] and [`Sync`] so one logger can be
/// shared by the router and the lifecycle via [`std::sync::Arc`].
pub trait TaskLogger: Send + Sync {
    /// Record a single entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying write fails.
    fn log_entry(&self, entry: TaskLogEntry) -> crate::Result<()>;

    /// Flush buffered entries to the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&self) -> crate::Result<()>;
}

pub use writer::JsonlTaskLogger;
