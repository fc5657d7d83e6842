//! NDJSON codec for the editor IPC socket.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized message cannot exhaust memory.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum line length accepted from the socket: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Inbound line decoder for the IPC stream.
///
/// Lines longer than [`MAX_LINE_BYTES`] are discarded up to their newline
/// and decoding resumes with the next line, so one oversized message never
/// ends the stream. I/O errors map to [`AppError::Io`].
#[derive(Debug)]
pub struct IpcCodec(LinesCodec);

impl IpcCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for IpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IpcCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => warn_oversized(),
                other => return other.map_err(map_io_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => warn_oversized(),
                other => return other.map_err(map_io_error),
            }
        }
    }
}

fn warn_oversized() {
    warn!(max_bytes = MAX_LINE_BYTES, "ipc codec: discarding oversized line");
}

fn map_io_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Ipc(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
