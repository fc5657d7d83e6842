//! One open IPC connection to the editor.
//!
//! [`IpcClient::open`] connects the socket and starts two background tasks:
//!
//! - a reader that decodes inbound lines, records the handshake, and forwards
//!   [`IpcEvent`]s through an [`mpsc`] channel;
//! - a writer that serialises outbound [`CommandEnvelope`]s as NDJSON.
//!
//! The reader emits [`IpcEvent::Disconnect`] exactly once when the server
//! sends `Disconnect`, closes the stream, or the stream fails. It stays silent
//! when the client itself is torn down via [`IpcClient::disconnect`].

use std::path::Path;

use futures_util::StreamExt;
use interprocess::local_socket::tokio::{prelude::*, RecvHalf, SendHalf, Stream};
use interprocess::local_socket::{GenericFilePath, ToFsName};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::ipc::codec::IpcCodec;
use crate::ipc::protocol::{self, CommandEnvelope, IpcEvent, IpcMessage, TaskCommand};
use crate::{AppError, Result};

/// Capacity of the inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outbound command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Handle to an open connection.
///
/// Dropping the handle without calling [`IpcClient::disconnect`] leaves the
/// background tasks running until the stream closes.
pub struct IpcClient {
    client_id: watch::Receiver<Option<String>>,
    command_tx: mpsc::Sender<CommandEnvelope>,
    cancel: CancellationToken,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl IpcClient {
    /// Open the socket at `path` and start the reader and writer tasks.
    ///
    /// The returned receiver yields every inbound event for the life of the
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the socket cannot be opened.
    pub async fn open(path: &Path) -> Result<(Self, mpsc::Receiver<IpcEvent>)> {
        let name = path
            .to_fs_name::<GenericFilePath>()
            .map_err(|err| AppError::Ipc(format!("invalid socket path {}: {err}", path.display())))?;

        let stream = Stream::connect(name)
            .await
            .map_err(|err| AppError::Ipc(format!("failed to open {}: {err}", path.display())))?;

        let (recv, send) = stream.split();
        let (client_id_tx, client_id_rx) = watch::channel(None);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let span = info_span!("ipc", socket = %path.display());
        let reader = tokio::spawn(
            run_reader(recv, client_id_tx, event_tx, cancel.clone()).instrument(span.clone()),
        );
        let writer =
            tokio::spawn(run_writer(send, command_rx, cancel.clone()).instrument(span));

        Ok((
            Self {
                client_id: client_id_rx,
                command_tx,
                cancel,
                reader: Some(reader),
                writer: Some(writer),
            },
            event_rx,
        ))
    }

    /// Whether the server has acknowledged the connection.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.client_id.borrow().is_some()
    }

    /// Whether the reader is still consuming the stream.
    ///
    /// Turns false once the server disconnects, the stream ends, or
    /// [`IpcClient::disconnect`] has run.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.reader
            .as_ref()
            .is_some_and(|reader| !reader.is_finished())
    }

    /// Client id assigned by the handshake, if it has completed.
    #[must_use]
    pub fn client_id(&self) -> Option<String> {
        self.client_id.borrow().clone()
    }

    /// Queue a command for delivery.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Ipc` if the handshake has not completed, the
    /// server has closed the connection, or the writer has stopped.
    pub async fn send_command(&self, command: TaskCommand) -> Result<()> {
        let client_id = self
            .client_id()
            .ok_or_else(|| AppError::Ipc("cannot send command before handshake".into()))?;

        let name = command.name();
        if !self.is_open() {
            return Err(AppError::Ipc(format!("connection closed, {name} not sent")));
        }
        self.command_tx
            .send(CommandEnvelope {
                client_id,
                data: command,
            })
            .await
            .map_err(|_| AppError::Ipc(format!("connection closed, {name} not sent")))
    }

    /// Stop both background tasks and close the socket.
    ///
    /// Commands already queued are written before the writer stops.
    pub async fn disconnect(&mut self) {
        self.cancel.cancel();

        if let Some(writer) = self.writer.take() {
            if let Err(err) = writer.await {
                warn!(%err, "ipc writer task failed");
            }
        }
        if let Some(reader) = self.reader.take() {
            if let Err(err) = reader.await {
                warn!(%err, "ipc reader task failed");
            }
        }
    }
}

async fn run_reader(
    recv: RecvHalf,
    client_id: watch::Sender<Option<String>>,
    event_tx: mpsc::Sender<IpcEvent>,
    cancel: CancellationToken,
) {
    let mut framed = FramedRead::new(recv, IpcCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("ipc reader: cancellation received, stopping");
                return;
            }

            item = framed.next() => {
                let line = match item {
                    None => {
                        debug!("ipc reader: EOF detected");
                        break;
                    }
                    Some(Err(err)) => {
                        warn!(%err, "ipc reader: stream error, stopping");
                        break;
                    }
                    Some(Ok(line)) => line,
                };

                match protocol::parse_line(&line) {
                    Ok(Some(IpcMessage::Ack { data })) => {
                        debug!(client_id = %data.client_id, pid = data.pid, "ipc reader: handshake acknowledged");
                        client_id.send_replace(Some(data.client_id));
                    }
                    Ok(Some(IpcMessage::TaskEvent { data })) => {
                        if event_tx.send(IpcEvent::TaskEvent(data)).await.is_err() {
                            debug!("ipc reader: event receiver dropped, stopping");
                            return;
                        }
                    }
                    Ok(Some(IpcMessage::Disconnect)) => {
                        debug!("ipc reader: server sent disconnect");
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        warn!(%err, raw_line = %line, "ipc reader: parse error, skipping line");
                    }
                }
            }
        }
    }

    if event_tx.send(IpcEvent::Disconnect).await.is_err() {
        debug!("ipc reader: event receiver dropped before disconnect delivery");
    }
}

async fn run_writer(
    mut send: SendHalf,
    mut command_rx: mpsc::Receiver<CommandEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            biased;

            envelope = command_rx.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },

            () = cancel.cancelled() => {
                debug!("ipc writer: cancellation received, stopping");
                break;
            }
        };

        let mut line = match protocol::encode_command(&envelope) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "ipc writer: dropping command");
                continue;
            }
        };
        line.push('\n');

        if let Err(err) = send.write_all(line.as_bytes()).await {
            warn!(%err, command = envelope.data.name(), "ipc writer: write failed, stopping");
            break;
        }
        if let Err(err) = send.flush().await {
            warn!(%err, "ipc writer: flush failed, stopping");
            break;
        }
        debug!(command = envelope.data.name(), "ipc writer: command sent");
    }
}
