//! JSONL task log writer.

use std::{
    fs::{self, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use super::{TaskLogEntry, TaskLogger};
use crate::{AppError, Result};

/// Appends one JSON object per line to a single task log file.
///
/// Entries are buffered; [`TaskLogger::flush`] pushes them to disk.
pub struct JsonlTaskLogger {
    path: PathBuf,
    writer: Mutex<BufWriter<fs::File>>,
}

impl JsonlTaskLogger {
    /// Open (creating if missing) `<log_dir>/<run_id>/<language>-<exercise>.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the directory or file cannot be created.
    pub fn for_task(log_dir: &Path, run_id: i64, language: &str, exercise: &str) -> Result<Self> {
        let dir = log_dir.join(run_id.to_string());
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::Io(format!("failed to create task log directory {}: {e}", dir.display()))
        })?;
        Self::open(dir.join(format!("{language}-{exercise}.jsonl")))
    }

    /// Open (creating if missing) the log file at `path` in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the file cannot be opened.
    pub fn open(path: PathBuf) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open task log {}: {e}", path.display())))?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskLogger for JsonlTaskLogger {
    fn log_entry(&self, entry: TaskLogEntry) -> Result<()> {
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize task log entry: {e}")))?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::Io("task log mutex poisoned".into()))?;

        writeln!(writer, "{line}").map_err(|e| AppError::Io(format!("task log write failed: {e}")))
    }

    fn flush(&self) -> Result<()> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| AppError::Io("task log mutex poisoned".into()))?;

        writer
            .flush()
            .map_err(|e| AppError::Io(format!("task log flush failed: {e}")))
    }
}
