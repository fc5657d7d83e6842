//! Task events emitted by the remote agent session.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event name of a [`TaskEvent`].
///
/// Names the orchestrator does not know are preserved verbatim in
/// [`EventName::Other`] so they can still be published and logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventName {
    /// Streamed chat message (possibly a partial fragment).
    Message,
    /// Task object created by the agent.
    TaskCreated,
    /// Agent session started; payload carries the remote task id.
    TaskStarted,
    /// Agent switched mode.
    TaskModeSwitched,
    /// Task paused.
    TaskPaused,
    /// Task resumed.
    TaskUnpaused,
    /// Agent answered one of its own ask prompts.
    TaskAskResponded,
    /// Task aborted.
    TaskAborted,
    /// Subtask spawned.
    TaskSpawned,
    /// Task completed.
    TaskCompleted,
    /// Cumulative token usage changed.
    TaskTokenUsageUpdated,
    /// A tool invocation failed.
    TaskToolFailed,
    /// Any name not listed above.
    Other(String),
}

impl EventName {
    /// Wire name of the event.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::TaskCreated => "taskCreated",
            Self::TaskStarted => "taskStarted",
            Self::TaskModeSwitched => "taskModeSwitched",
            Self::TaskPaused => "taskPaused",
            Self::TaskUnpaused => "taskUnpaused",
            Self::TaskAskResponded => "taskAskResponded",
            Self::TaskAborted => "taskAborted",
            Self::TaskSpawned => "taskSpawned",
            Self::TaskCompleted => "taskCompleted",
            Self::TaskTokenUsageUpdated => "taskTokenUsageUpdated",
            Self::TaskToolFailed => "taskToolFailed",
            Self::Other(name) => name,
        }
    }

    /// Whether the event ends the agent session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::TaskCompleted | Self::TaskAborted)
    }
}

impl From<String> for EventName {
    fn from(value: String) -> Self {
        match value.as_str() {
            "message" => Self::Message,
            "taskCreated" => Self::TaskCreated,
            "taskStarted" => Self::TaskStarted,
            "taskModeSwitched" => Self::TaskModeSwitched,
            "taskPaused" => Self::TaskPaused,
            "taskUnpaused" => Self::TaskUnpaused,
            "taskAskResponded" => Self::TaskAskResponded,
            "taskAborted" => Self::TaskAborted,
            "taskSpawned" => Self::TaskSpawned,
            "taskCompleted" => Self::TaskCompleted,
            "taskTokenUsageUpdated" => Self::TaskTokenUsageUpdated,
            "taskToolFailed" => Self::TaskToolFailed,
            _ => Self::Other(value),
        }
    }
}

impl From<EventName> for String {
    fn from(value: EventName) -> Self {
        match value {
            EventName::Other(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

impl Display for EventName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable event emitted by the remote agent session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    /// Event classification.
    pub event_name: EventName,
    /// Positional payload; shape depends on `event_name`.
    #[serde(default)]
    pub payload: Vec<Value>,
}

impl TaskEvent {
    /// Construct an event.
    #[must_use]
    pub fn new(event_name: EventName, payload: Vec<Value>) -> Self {
        Self {
            event_name,
            payload,
        }
    }

    /// Payload element at `index`.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.payload.get(index)
    }

    /// Payload element at `index` as a string.
    #[must_use]
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.payload.get(index).and_then(Value::as_str)
    }

    /// Whether this is a `message` event carrying a partial fragment.
    #[must_use]
    pub fn is_partial_message(&self) -> bool {
        self.event_name == EventName::Message
            && self
                .arg(0)
                .and_then(|first| first.get("message"))
                .and_then(|message| message.get("partial"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }
}

/// Event forwarded to downstream consumers, tagged with the local task id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublishedEvent {
    /// The forwarded event.
    #[serde(flatten)]
    pub event: TaskEvent,
    /// Local task identifier.
    pub task_id: i64,
}
