#![forbid(unsafe_code)]

//! Task execution orchestrator for editor-hosted coding agents.
//!
//! Launches an editor, connects to its agent over local IPC, drives one task
//! to completion under a global timeout, and records metrics, tool errors,
//! and timestamps in `SQLite` while publishing agent events downstream.

pub mod config;
pub mod errors;
pub mod ipc;
pub mod models;
pub mod orchestrator;
pub mod persistence;
pub mod publish;
pub mod tasklog;
pub mod wait;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
