//! Domain model module declarations.

pub mod event;
pub mod metrics;
pub mod run;
pub mod task;
pub mod tool_error;
