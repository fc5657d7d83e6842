//! Event router: classifies inbound events and applies their effects.
//!
//! Each [`TaskEvent`] is, in order:
//!
//! 1. published downstream unless it is a chat message;
//! 2. written to the task log unless it is a usage update, an ask response,
//!    or a partial chat message;
//! 3. applied to the session state and persistence.
//!
//! Persistence and publish failures are logged and never stop the session.

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::ipc::protocol::IpcEvent;
use crate::models::event::{EventName, PublishedEvent, TaskEvent};
use crate::models::metrics::{TokenUsage, ToolUsage};
use crate::models::tool_error::NewToolError;
use crate::orchestrator::metrics::MetricsAggregator;
use crate::orchestrator::session::SessionState;
use crate::persistence::task_repo::TaskRepo;
use crate::persistence::tool_error_repo::ToolErrorRepo;
use crate::publish::EventPublisher;
use crate::tasklog::{TaskLogEntry, TaskLogLevel, TaskLogger};
use crate::{AppError, Result};

/// Whether `name` is forwarded to downstream consumers.
#[must_use]
pub fn is_broadcast(name: &EventName) -> bool {
    !matches!(name, EventName::Message)
}

/// Whether `event` is written to the task log.
#[must_use]
pub fn is_logged(event: &TaskEvent) -> bool {
    !matches!(
        event.event_name,
        EventName::TaskTokenUsageUpdated | EventName::TaskAskResponded
    ) && !event.is_partial_message()
}

/// Routes events of one task.
pub struct EventRouter {
    task_id: i64,
    tasks: TaskRepo,
    tool_errors: ToolErrorRepo,
    metrics: MetricsAggregator,
    publisher: Arc<dyn EventPublisher>,
    logger: Arc<dyn TaskLogger>,
}

impl EventRouter {
    /// Create a router for `task_id`.
    #[must_use]
    pub fn new(
        task_id: i64,
        tasks: TaskRepo,
        tool_errors: ToolErrorRepo,
        metrics: MetricsAggregator,
        publisher: Arc<dyn EventPublisher>,
        logger: Arc<dyn TaskLogger>,
    ) -> Self {
        Self {
            task_id,
            tasks,
            tool_errors,
            metrics,
            publisher,
            logger,
        }
    }

    /// Process one inbound event.
    pub async fn handle(&self, state: &mut SessionState, event: IpcEvent) {
        match event {
            IpcEvent::TaskEvent(event) => self.handle_task_event(state, event).await,
            IpcEvent::Disconnect => {
                state.client_disconnected = true;
                info!(task_id = self.task_id, "agent connection closed");
                self.log(TaskLogLevel::Warn, "client disconnected");
            }
        }
    }

    /// Write a lifecycle diagnostic to the task log.
    pub fn log(&self, level: TaskLogLevel, message: impl Into<String>) {
        if let Err(err) = self
            .logger
            .log_entry(TaskLogEntry::new(self.task_id, level, message))
        {
            warn!(task_id = self.task_id, %err, "failed to write task log");
        }
    }

    /// Persist the finish time unless a terminal path already did.
    ///
    /// Returns whether this call recorded it.
    pub async fn finish(&self, state: &mut SessionState) -> bool {
        if state.task_finished_at.is_some() {
            return false;
        }

        let now = Utc::now();
        state.task_finished_at = Some(now);
        if let Err(err) = self.tasks.mark_finished(self.task_id, now).await {
            warn!(task_id = self.task_id, %err, "failed to persist finish time");
            self.log(TaskLogLevel::Error, format!("failed to persist finish time: {err}"));
        }
        true
    }

    async fn handle_task_event(&self, state: &mut SessionState, event: TaskEvent) {
        debug!(task_id = self.task_id, event_name = %event.event_name, "task event received");

        if is_broadcast(&event.event_name) {
            let published = PublishedEvent {
                event: event.clone(),
                task_id: self.task_id,
            };
            if let Err(err) = self.publisher.publish(published).await {
                warn!(task_id = self.task_id, %err, "failed to publish event");
            }
        }

        if is_logged(&event) {
            let entry = TaskLogEntry::new(
                self.task_id,
                TaskLogLevel::Info,
                format!("event {}", event.event_name),
            )
            .with_event(event.event_name.as_str(), Value::Array(event.payload.clone()));
            if let Err(err) = self.logger.log_entry(entry) {
                warn!(task_id = self.task_id, %err, "failed to write task log");
            }
        }

        if let Err(err) = self.apply(state, &event).await {
            warn!(
                task_id = self.task_id,
                event_name = %event.event_name,
                %err,
                "failed to apply event"
            );
            self.log(
                TaskLogLevel::Error,
                format!("failed to apply {}: {err}", event.event_name),
            );
        }
    }

    async fn apply(&self, state: &mut SessionState, event: &TaskEvent) -> Result<()> {
        let applied = match event.event_name {
            EventName::TaskStarted => self.on_started(state, event).await,
            EventName::TaskToolFailed => self.on_tool_failed(event).await,
            EventName::TaskTokenUsageUpdated => self.on_usage(state, event).await,
            EventName::TaskCompleted => {
                let usage = self.on_usage(state, event).await;
                let tool_usage = self.on_tool_usage(state, event).await;
                usage.and(tool_usage)
            }
            _ => Ok(()),
        };

        // Final counters are written before the finish time.
        if event.event_name.is_terminal() {
            self.finish(state).await;
        }
        applied
    }

    async fn on_started(&self, state: &mut SessionState, event: &TaskEvent) -> Result<()> {
        let now = Utc::now();
        state.task_started_at = now;
        state.remote_task_id = event.str_arg(0).map(str::to_owned);

        let metrics_id = self.metrics.start().await?;
        state.task_metrics_id = Some(metrics_id);
        self.tasks.mark_started(self.task_id, metrics_id, now).await?;

        info!(
            task_id = self.task_id,
            metrics_id,
            remote_task_id = state.remote_task_id.as_deref().unwrap_or_default(),
            "agent session started"
        );
        Ok(())
    }

    async fn on_tool_failed(&self, event: &TaskEvent) -> Result<()> {
        let (Some(tool_name), Some(error)) = (event.str_arg(1), event.str_arg(2)) else {
            return Err(AppError::Ipc("taskToolFailed payload missing tool name or error".into()));
        };

        self.tool_errors
            .create(&NewToolError {
                task_id: self.task_id,
                tool_name: tool_name.to_owned(),
                error: error.to_owned(),
            })
            .await?;
        Ok(())
    }

    async fn on_usage(&self, state: &SessionState, event: &TaskEvent) -> Result<()> {
        let Some(metrics_id) = state.task_metrics_id else {
            debug!(task_id = self.task_id, "usage reported before session start, ignoring");
            return Ok(());
        };
        let Some(usage) = payload_arg::<TokenUsage>(event, 1)? else {
            return Ok(());
        };

        self.metrics
            .record_usage(metrics_id, &usage, state.elapsed_ms(Utc::now()))
            .await
    }

    async fn on_tool_usage(&self, state: &SessionState, event: &TaskEvent) -> Result<()> {
        let Some(metrics_id) = state.task_metrics_id else {
            return Ok(());
        };
        let Some(tool_usage) = payload_arg::<ToolUsage>(event, 2)? else {
            return Ok(());
        };

        self.metrics.record_tool_usage(metrics_id, &tool_usage).await
    }
}

/// Decode payload element `index`; absent or `null` elements yield `None`.
fn payload_arg<T: DeserializeOwned>(event: &TaskEvent, index: usize) -> Result<Option<T>> {
    match event.arg(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::deserialize(value).map(Some).map_err(|e| {
            AppError::Ipc(format!(
                "invalid {} payload element {index}: {e}",
                event.event_name
            ))
        }),
    }
}
