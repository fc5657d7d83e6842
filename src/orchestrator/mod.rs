//! Task orchestration.
//!
//! Covers building the editor command, launching and stopping the editor,
//! routing agent events, aggregating metrics, and the lifecycle state
//! machine that ties them together.

pub mod command;
pub mod launcher;
pub mod lifecycle;
pub mod metrics;
pub mod router;
pub mod session;

pub use lifecycle::{TaskOrchestrator, TaskOutcome};
