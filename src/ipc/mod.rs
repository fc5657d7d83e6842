//! Local IPC client for the editor-hosted agent.
//!
//! The editor listens on a Unix domain socket (named pipe on Windows) and
//! exchanges newline-delimited JSON messages with the orchestrator.
//!
//! - `codec`: line framing with a 1 MiB per-message limit.
//! - `protocol`: wire message types in both directions.
//! - `client`: one open connection with its reader and writer tasks.
//! - `connection`: bounded retry loop that yields a ready client.

pub mod client;
pub mod codec;
pub mod connection;
pub mod protocol;
