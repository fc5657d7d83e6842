//! Bounded connection retry against the editor socket.

use std::path::Path;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::TimeoutConfig;
use crate::ipc::client::IpcClient;
use crate::ipc::protocol::IpcEvent;
use crate::wait::{wait_for, WaitOutcome};
use crate::{AppError, Result};

/// Retry policy for [`connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Maximum number of attempts.
    pub attempts: u32,
    /// Readiness poll interval within one attempt.
    pub poll_interval: Duration,
    /// Readiness window of one attempt.
    pub ready_timeout: Duration,
}

impl From<&TimeoutConfig> for ConnectOptions {
    fn from(timeouts: &TimeoutConfig) -> Self {
        Self {
            attempts: timeouts.connect_attempts,
            poll_interval: Duration::from_millis(timeouts.connect_poll_ms),
            ready_timeout: Duration::from_millis(timeouts.connect_ready_timeout_ms),
        }
    }
}

/// Connect to the socket at `path` and wait for the handshake.
///
/// Each attempt opens a fresh client and polls its readiness until the
/// attempt's window closes. A client that never becomes ready is torn down
/// before the next attempt. An attempt whose socket cannot be opened still
/// waits out its window, so the editor gets the same time to come up either
/// way.
///
/// # Errors
///
/// Returns `AppError::Ipc` when every attempt fails.
pub async fn connect(
    path: &Path,
    options: &ConnectOptions,
) -> Result<(IpcClient, mpsc::Receiver<IpcEvent>)> {
    for attempt in 1..=options.attempts {
        match IpcClient::open(path).await {
            Ok((mut client, events)) => {
                let outcome =
                    wait_for(|| client.is_ready(), options.poll_interval, options.ready_timeout)
                        .await;

                if outcome == WaitOutcome::Satisfied {
                    info!(
                        attempt,
                        client_id = client.client_id().as_deref().unwrap_or_default(),
                        "ipc connection ready"
                    );
                    return Ok((client, events));
                }

                warn!(attempt, "ipc connection not ready, retrying");
                client.disconnect().await;
            }
            Err(err) => {
                debug!(attempt, %err, "ipc socket not available yet");
                tokio::time::sleep(options.ready_timeout).await;
            }
        }
    }

    Err(AppError::Ipc(format!(
        "unable to connect to {} after {} attempts",
        path.display(),
        options.attempts
    )))
}
