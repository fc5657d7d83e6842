//! Editor process launcher and supervisor.
//!
//! [`launch`] spawns the editor under `sh -c` and hands the child to a
//! monitor task. The monitor forwards the process output to the tracing log,
//! requests a graceful stop when the shared [`CancellationToken`] fires, and
//! publishes the exit status to the returned [`ProcessHandle`].

use std::process::Stdio;
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::orchestrator::command::LaunchCommand;
use crate::{AppError, Result};

/// Signals the orchestrator can deliver to the editor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// Graceful stop request (`SIGTERM`).
    Terminate,
    /// Unconditional kill (`SIGKILL`).
    Kill,
}

/// Result of waiting for the editor to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// The process exited; the code is absent when it died from a signal.
    Exited(Option<i32>),
    /// The process was still running when the wait ended.
    TimedOut,
}

/// Launch-time behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Containerized editors skip the startup jitter.
    pub containerized: bool,
    /// Lower bound of the startup jitter.
    pub jitter_min: Duration,
    /// Upper bound of the startup jitter.
    pub jitter_max: Duration,
}

impl LaunchOptions {
    /// Options for the given mode with jitter bounds from `timeouts`.
    #[must_use]
    pub fn new(containerized: bool, timeouts: &TimeoutConfig) -> Self {
        Self {
            containerized,
            jitter_min: Duration::from_millis(timeouts.jitter_min_ms),
            jitter_max: Duration::from_millis(timeouts.jitter_max_ms),
        }
    }

    /// Delay applied before spawning.
    ///
    /// Interactive editors wait a uniform random time within the jitter
    /// bounds so concurrent tasks do not open their windows together.
    #[must_use]
    pub fn startup_delay(&self) -> Duration {
        if self.containerized || self.jitter_max.is_zero() {
            return Duration::ZERO;
        }
        let min = self.jitter_min.min(self.jitter_max);
        rand::thread_rng().gen_range(min..=self.jitter_max)
    }
}

/// Handle to a launched editor process.
pub struct ProcessHandle {
    pid: u32,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl ProcessHandle {
    /// OS process id of the shell running the editor.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the process has already exited.
    #[must_use]
    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }

    /// Deliver `signal` to the process.
    ///
    /// Returns whether the signal was delivered; delivery does not mean the
    /// process has exited.
    #[must_use]
    pub fn terminate(&self, signal: StopSignal) -> bool {
        if self.has_exited() {
            return false;
        }
        deliver_signal(self.pid, signal)
    }

    /// Wait up to `timeout` for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Process` if the monitor task stopped without
    /// observing an exit.
    pub async fn wait_for_exit(&self, timeout: Duration) -> Result<ExitOutcome> {
        let mut exit = self.exit.clone();
        let waited = tokio::time::timeout(timeout, async {
            exit.wait_for(Option::is_some)
                .await
                .map(|state| (*state).flatten())
        })
        .await;

        match waited {
            Ok(Ok(code)) => Ok(ExitOutcome::Exited(code)),
            Ok(Err(_)) => Err(AppError::Process(format!(
                "monitor for process {} stopped before exit",
                self.pid
            ))),
            Err(_elapsed) => Ok(ExitOutcome::TimedOut),
        }
    }
}

/// Spawn the editor described by `command`.
///
/// Sleeps for [`LaunchOptions::startup_delay`] first. When `cancel` fires the
/// monitor sends `SIGTERM` and keeps waiting for the exit.
///
/// # Errors
///
/// Returns `AppError::Process` if the shell cannot be spawned.
pub async fn launch(
    command: &LaunchCommand,
    options: &LaunchOptions,
    cancel: CancellationToken,
) -> Result<ProcessHandle> {
    let delay = options.startup_delay();
    if !delay.is_zero() {
        debug!(delay_ms = delay.as_millis(), "delaying editor startup");
        tokio::time::sleep(delay).await;
    }

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(&command.command)
        .envs(&command.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| AppError::Process(format!("failed to spawn editor: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Process("editor exited before its pid was read".into()))?;

    info!(pid, command = %command.command, "editor process spawned");

    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_output(pid, "stdout", stdout));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_output(pid, "stderr", stderr));
    }

    let (exit_tx, exit_rx) = watch::channel(None);

    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            () = cancel.cancelled() => {
                if deliver_signal(pid, StopSignal::Terminate) {
                    debug!(pid, "sent SIGTERM to editor");
                } else if let Err(err) = child.start_kill() {
                    warn!(pid, %err, "failed to stop editor");
                }
                child.wait().await
            }
        };

        match status {
            Ok(status) => {
                info!(pid, code = ?status.code(), "editor process exited");
                exit_tx.send_replace(Some(status.code()));
            }
            Err(err) => {
                warn!(pid, %err, "failed to wait for editor process");
            }
        }
    });

    Ok(ProcessHandle { pid, exit: exit_rx })
}

/// Forward each line of a child output stream to the tracing log.
async fn forward_output<R>(pid: u32, stream: &'static str, output: R)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(output).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(pid, stream, "{line}"),
            Ok(None) => break,
            Err(err) => {
                debug!(pid, stream, %err, "editor output closed");
                break;
            }
        }
    }
}

#[cfg(unix)]
fn deliver_signal(pid: u32, signal: StopSignal) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    let signal = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(raw), signal) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, ?signal, %err, "signal delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn deliver_signal(pid: u32, signal: StopSignal) -> bool {
    warn!(pid, ?signal, "signals are not supported on this platform");
    false
}
