//! Wire messages exchanged with the editor over the IPC socket.
//!
//! Server to client:
//!
//! ```json
//! {"type":"Ack","data":{"clientId":"c1","pid":42,"ppid":1}}
//! {"type":"TaskEvent","data":{"eventName":"taskStarted","payload":["remote-1"]}}
//! {"type":"Disconnect"}
//! ```
//!
//! Client to server:
//!
//! ```json
//! {"type":"TaskCommand","clientId":"c1","data":{"commandName":"CancelTask","data":"remote-1"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::event::TaskEvent;
use crate::{AppError, Result};

/// Handshake acknowledgement that makes a connection ready.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    /// Identifier the server assigned to this client.
    pub client_id: String,
    /// Editor extension host process id.
    #[serde(default)]
    pub pid: u32,
    /// Parent process id.
    #[serde(default)]
    pub ppid: u32,
}

/// Message received from the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Connection accepted.
    Ack {
        /// Handshake payload.
        data: Ack,
    },
    /// Agent task event.
    TaskEvent {
        /// Event payload.
        data: TaskEvent,
    },
    /// Server is closing the connection.
    Disconnect,
}

/// Command addressed to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "commandName", content = "data")]
pub enum TaskCommand {
    /// Start a new agent task.
    StartNewTask {
        /// Merged agent configuration.
        configuration: Map<String, Value>,
        /// Prompt text.
        text: String,
        /// Open the task in a new editor tab.
        #[serde(rename = "newTab")]
        new_tab: bool,
    },
    /// Cancel the remote task with this id.
    CancelTask(String),
    /// Close the remote task with this id.
    CloseTask(String),
}

impl TaskCommand {
    /// Command name as it appears on the wire.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartNewTask { .. } => "StartNewTask",
            Self::CancelTask(_) => "CancelTask",
            Self::CloseTask(_) => "CloseTask",
        }
    }
}

/// Outbound envelope wrapping a [`TaskCommand`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename = "TaskCommand", rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Client id from the handshake.
    pub client_id: String,
    /// The command.
    pub data: TaskCommand,
}

/// Event delivered to the orchestrator by a connected client.
#[derive(Debug, Clone, PartialEq)]
pub enum IpcEvent {
    /// Agent task event.
    TaskEvent(TaskEvent),
    /// The connection ended (explicit message, EOF, or stream error).
    Disconnect,
}

/// Parse one inbound line.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns `AppError::Ipc` when the line is not a known message.
pub fn parse_line(line: &str) -> Result<Option<IpcMessage>> {
    if line.trim().is_empty() {
        return Ok(None);
    }

    serde_json::from_str(line)
        .map(Some)
        .map_err(|e| AppError::Ipc(format!("malformed message: {e}")))
}

/// Serialize a command envelope as one line, without the trailing newline.
///
/// # Errors
///
/// Returns `AppError::Ipc` if serialization fails.
pub fn encode_command(envelope: &CommandEnvelope) -> Result<String> {
    serde_json::to_string(envelope)
        .map_err(|e| AppError::Ipc(format!("failed to serialise command: {e}")))
}
