//! Lifecycle controller: drives one task from launch to teardown.
//!
//! ```text
//! Launching -> Connecting -> Running -> (Canceling) -> ClosingSession
//!           -> TerminatingProcess -> Done
//! ```
//!
//! Spawn and connect failures are fatal and return before any task timestamp
//! is written. Every other path records a finish time, closes the session,
//! and stops the editor within a bounded time.

use std::fmt::{Display, Formatter};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::ipc::client::IpcClient;
use crate::ipc::connection::{self, ConnectOptions};
use crate::ipc::protocol::{IpcEvent, TaskCommand};
use crate::models::run::Run;
use crate::models::task::Task;
use crate::orchestrator::command;
use crate::orchestrator::launcher::{self, ExitOutcome, LaunchOptions, ProcessHandle, StopSignal};
use crate::orchestrator::metrics::MetricsAggregator;
use crate::orchestrator::router::EventRouter;
use crate::orchestrator::session::SessionState;
use crate::persistence::db::Database;
use crate::persistence::metrics_repo::TaskMetricsRepo;
use crate::persistence::task_repo::TaskRepo;
use crate::persistence::tool_error_repo::ToolErrorRepo;
use crate::publish::EventPublisher;
use crate::tasklog::{TaskLogLevel, TaskLogger};
use crate::wait::WaitOutcome;
use crate::{AppError, Result};

/// Lifecycle phase, used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Building the command and spawning the editor.
    Launching,
    /// Establishing the IPC connection.
    Connecting,
    /// Task started; waiting for completion or disconnect.
    Running,
    /// Timed out; asking the agent to cancel.
    Canceling,
    /// Closing the agent task and the connection.
    ClosingSession,
    /// Stopping the editor process.
    TerminatingProcess,
    /// Finished.
    Done,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Launching => "launching",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Canceling => "canceling",
            Self::ClosingSession => "closing_session",
            Self::TerminatingProcess => "terminating_process",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Why the running phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    /// The agent reported completion or abort.
    Finished,
    /// The connection ended first.
    Disconnected,
    /// The task timeout elapsed first.
    TimedOut,
    /// `StartNewTask` could not be delivered.
    StartFailed,
}

/// How the editor process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited within the shutdown window.
    Exited(Option<i32>),
    /// Did not exit in time and was sent `SIGKILL`.
    Killed,
    /// Did not exit in time and could not be killed.
    Abandoned,
}

/// Summary of a completed invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    /// Terminal path taken.
    pub reason: TerminalReason,
    /// Final session state.
    pub state: SessionState,
    /// Editor shutdown result.
    pub process: ProcessExit,
}

/// Merge agent configuration: base settings, then run settings, then task
/// settings, then the API credential.
#[must_use]
pub fn merge_configuration(config: &GlobalConfig, run: &Run, task: &Task) -> Map<String, Value> {
    let mut merged = config.base_settings();
    merged.extend(run.settings_map());
    merged.extend(task.settings_map());

    if let Some(ref api_key) = config.api_key {
        merged.insert(
            config.credential_setting.clone(),
            Value::String(api_key.clone()),
        );
    }
    merged
}

/// Runs tasks against editor instances.
pub struct TaskOrchestrator {
    config: Arc<GlobalConfig>,
    db: Arc<Database>,
    publisher: Arc<dyn EventPublisher>,
    logger: Arc<dyn TaskLogger>,
}

impl TaskOrchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        publisher: Arc<dyn EventPublisher>,
        logger: Arc<dyn TaskLogger>,
    ) -> Self {
        Self {
            config,
            db,
            publisher,
            logger,
        }
    }

    /// Run `task` of `run` to completion.
    ///
    /// # Errors
    ///
    /// - `AppError::Io` if the workspace, prompt file, or socket directory is
    ///   unusable.
    /// - `AppError::Process` if the editor cannot be spawned, or if its
    ///   monitor is lost during shutdown.
    /// - `AppError::Ipc` if the connection never becomes ready.
    pub async fn run_task(&self, run: &Run, task: &Task) -> Result<TaskOutcome> {
        let span = info_span!(
            "task",
            task_id = task.id,
            run_id = run.id,
            language = %task.language,
            exercise = %task.exercise
        );
        self.run_task_inner(run, task).instrument(span).await
    }

    async fn run_task_inner(&self, run: &Run, task: &Task) -> Result<TaskOutcome> {
        let timeouts = &self.config.timeouts;
        let router = EventRouter::new(
            task.id,
            TaskRepo::new(Arc::clone(&self.db)),
            ToolErrorRepo::new(Arc::clone(&self.db)),
            MetricsAggregator::new(TaskMetricsRepo::new(Arc::clone(&self.db))),
            Arc::clone(&self.publisher),
            Arc::clone(&self.logger),
        );

        // Launching
        enter(&router, Phase::Launching);
        let workspace = self.config.workspace_path(&task.language, &task.exercise);
        if !tokio::fs::metadata(&workspace)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Err(AppError::Io(format!(
                "workspace {} is not a directory",
                workspace.display()
            )));
        }
        let prompt_path = self.config.prompt_path(&task.language);
        let prompt = tokio::fs::read_to_string(&prompt_path).await.map_err(|err| {
            AppError::Io(format!("failed to read prompt {}: {err}", prompt_path.display()))
        })?;

        let socket = command::socket_path(&self.config.socket_root, run.id, task.id);
        prepare_socket_dir(&socket).await?;

        let launch_command = command::build_command(
            &self.config.editor,
            &workspace,
            self.config.containerized,
            &socket,
        );
        let cancel = CancellationToken::new();
        let process = launcher::launch(
            &launch_command,
            &LaunchOptions::new(self.config.containerized, timeouts),
            cancel.clone(),
        )
        .await?;
        time::sleep(timeouts.settle()).await;

        // Connecting
        enter(&router, Phase::Connecting);
        let (mut client, mut events) =
            match connection::connect(&socket, &ConnectOptions::from(timeouts)).await {
                Ok(connected) => connected,
                Err(err) => {
                    error!(%err, "failed to connect to editor");
                    router.log(TaskLogLevel::Error, format!("connect failed: {err}"));
                    if let Err(shutdown_err) = self.stop_process(&router, &process, &cancel).await {
                        warn!(%shutdown_err, "editor shutdown after connect failure failed");
                    }
                    self.flush_log();
                    return Err(err);
                }
            };

        // Running
        enter(&router, Phase::Running);
        let mut state = SessionState::new();
        let start = TaskCommand::StartNewTask {
            configuration: merge_configuration(&self.config, run, task),
            text: prompt,
            new_tab: true,
        };
        let reason = if let Err(err) = client.send_command(start).await {
            warn!(%err, "failed to send StartNewTask");
            router.log(TaskLogLevel::Error, format!("StartNewTask not sent: {err}"));
            TerminalReason::StartFailed
        } else {
            let waited = drive_events(
                &router,
                &mut state,
                &mut events,
                timeouts.task(),
                Some(timeouts.wait_poll()),
            )
            .await;

            match waited {
                WaitOutcome::TimedOut => TerminalReason::TimedOut,
                WaitOutcome::Satisfied if state.task_finished_at.is_some() => {
                    TerminalReason::Finished
                }
                WaitOutcome::Satisfied => TerminalReason::Disconnected,
            }
        };

        match reason {
            TerminalReason::Finished => {
                info!("agent task finished");
            }
            TerminalReason::StartFailed => {
                router.finish(&mut state).await;
            }
            TerminalReason::Disconnected => {
                warn!("editor disconnected before the task finished");
                router.finish(&mut state).await;
            }
            TerminalReason::TimedOut => {
                warn!(timeout_s = timeouts.task_seconds, "task timed out");
                router.log(TaskLogLevel::Warn, "task timed out");

                if let Some(remote_task_id) = state.remote_task_id.clone() {
                    enter(&router, Phase::Canceling);
                    let cancel_task = TaskCommand::CancelTask(remote_task_id);
                    if let Err(err) = client.send_command(cancel_task).await {
                        warn!(%err, "failed to send CancelTask");
                    }
                    drive_events(
                        &router,
                        &mut state,
                        &mut events,
                        timeouts.cancel_grace(),
                        None,
                    )
                    .await;
                }
                router.finish(&mut state).await;
            }
        }

        // ClosingSession
        enter(&router, Phase::ClosingSession);
        self.close_session(&router, &mut state, &mut client, &mut events)
            .await;

        // TerminatingProcess
        let process_exit = self.stop_process(&router, &process, &cancel).await;

        // Done
        enter(&router, Phase::Done);
        self.flush_log();

        Ok(TaskOutcome {
            reason,
            state,
            process: process_exit?,
        })
    }

    async fn close_session(
        &self,
        router: &EventRouter,
        state: &mut SessionState,
        client: &mut IpcClient,
        events: &mut mpsc::Receiver<IpcEvent>,
    ) {
        if !state.client_disconnected {
            if let Some(remote_task_id) = state.remote_task_id.clone() {
                match client.send_command(TaskCommand::CloseTask(remote_task_id)).await {
                    Ok(()) => {
                        drive_events(
                            router,
                            state,
                            events,
                            self.config.timeouts.close_settle(),
                            None,
                        )
                        .await;
                    }
                    Err(err) => warn!(%err, "failed to send CloseTask"),
                }
            }
        }

        client.disconnect().await;
    }

    async fn stop_process(
        &self,
        router: &EventRouter,
        process: &ProcessHandle,
        cancel: &CancellationToken,
    ) -> Result<ProcessExit> {
        enter(router, Phase::TerminatingProcess);
        cancel.cancel();

        match process.wait_for_exit(self.config.timeouts.shutdown()).await? {
            ExitOutcome::Exited(code) => Ok(ProcessExit::Exited(code)),
            ExitOutcome::TimedOut => {
                warn!(pid = process.pid(), "editor did not exit in time, killing");
                if process.terminate(StopSignal::Kill) {
                    router.log(TaskLogLevel::Warn, "editor killed after shutdown timeout");
                    Ok(ProcessExit::Killed)
                } else {
                    error!(pid = process.pid(), "failed to kill editor, abandoning it");
                    router.log(TaskLogLevel::Error, "failed to kill editor");
                    Ok(ProcessExit::Abandoned)
                }
            }
        }
    }

    fn flush_log(&self) {
        if let Err(err) = self.logger.flush() {
            warn!(%err, "failed to flush task log");
        }
    }
}

fn enter(router: &EventRouter, phase: Phase) {
    info!(%phase, "entering phase");
    router.log(TaskLogLevel::Info, format!("phase {phase}"));
}

/// Create the directory the editor binds its socket in.
async fn prepare_socket_dir(socket: &Path) -> Result<()> {
    let Some(parent) = socket.parent() else {
        return Ok(());
    };
    tokio::fs::create_dir_all(parent).await.map_err(|err| {
        AppError::Io(format!("failed to create socket dir {}: {err}", parent.display()))
    })
}

/// Route events until `timeout` elapses.
///
/// With `poll` set, the session is also checked immediately and on every
/// tick, and routing stops as soon as it is settled. A closed channel counts
/// as a disconnect.
async fn drive_events(
    router: &EventRouter,
    state: &mut SessionState,
    events: &mut mpsc::Receiver<IpcEvent>,
    timeout: Duration,
    poll: Option<Duration>,
) -> WaitOutcome {
    let deadline = Instant::now() + timeout;
    let mut ticker = time::interval(poll.unwrap_or(timeout).max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut open = true;

    loop {
        tokio::select! {
            biased;

            () = time::sleep_until(deadline) => {
                return if poll.is_some() && state.is_settled() {
                    WaitOutcome::Satisfied
                } else {
                    WaitOutcome::TimedOut
                };
            }

            event = events.recv(), if open => match event {
                Some(event) => router.handle(state, event).await,
                None => {
                    open = false;
                    if !state.client_disconnected {
                        router.handle(state, IpcEvent::Disconnect).await;
                    }
                }
            },

            _ = ticker.tick() => {
                if poll.is_some() && state.is_settled() {
                    return WaitOutcome::Satisfied;
                }
            }
        }
    }
}
