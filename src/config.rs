//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name used for credential lookups.
const KEYRING_SERVICE: &str = "evals-runner";

/// Timing constants for every suspension point of a task invocation.
///
/// All values are milliseconds unless the field name says otherwise.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Global bound on the wait for completion or disconnect.
    #[serde(default = "default_task_seconds")]
    pub task_seconds: u64,
    /// Connection attempts before the connect phase fails.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,
    /// Readiness poll interval within one connection attempt.
    #[serde(default = "default_connect_poll_ms")]
    pub connect_poll_ms: u64,
    /// Readiness window of one connection attempt.
    #[serde(default = "default_connect_ready_timeout_ms")]
    pub connect_ready_timeout_ms: u64,
    /// Delay between spawning the editor and the first connection attempt.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    /// Poll interval of the completion wait.
    #[serde(default = "default_wait_poll_ms")]
    pub wait_poll_ms: u64,
    /// Grace period after `CancelTask` before the finish time is forced.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
    /// Delay between `CloseTask` and dropping the connection.
    #[serde(default = "default_close_settle_ms")]
    pub close_settle_ms: u64,
    /// Window for the editor to exit after SIGTERM before SIGKILL.
    #[serde(default = "default_shutdown_ms")]
    pub shutdown_ms: u64,
    /// Lower bound of the interactive-mode startup jitter.
    #[serde(default = "default_jitter_min_ms")]
    pub jitter_min_ms: u64,
    /// Upper bound of the interactive-mode startup jitter.
    #[serde(default = "default_jitter_max_ms")]
    pub jitter_max_ms: u64,
}

fn default_task_seconds() -> u64 {
    300
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_connect_poll_ms() -> u64 {
    250
}

fn default_connect_ready_timeout_ms() -> u64 {
    1000
}

fn default_settle_ms() -> u64 {
    3000
}

fn default_wait_poll_ms() -> u64 {
    1000
}

fn default_cancel_grace_ms() -> u64 {
    5000
}

fn default_close_settle_ms() -> u64 {
    2000
}

fn default_shutdown_ms() -> u64 {
    10_000
}

fn default_jitter_min_ms() -> u64 {
    5000
}

fn default_jitter_max_ms() -> u64 {
    10_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_seconds: default_task_seconds(),
            connect_attempts: default_connect_attempts(),
            connect_poll_ms: default_connect_poll_ms(),
            connect_ready_timeout_ms: default_connect_ready_timeout_ms(),
            settle_ms: default_settle_ms(),
            wait_poll_ms: default_wait_poll_ms(),
            cancel_grace_ms: default_cancel_grace_ms(),
            close_settle_ms: default_close_settle_ms(),
            shutdown_ms: default_shutdown_ms(),
            jitter_min_ms: default_jitter_min_ms(),
            jitter_max_ms: default_jitter_max_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Global task timeout.
    #[must_use]
    pub fn task(&self) -> Duration {
        Duration::from_secs(self.task_seconds)
    }

    /// Post-spawn settle delay.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    /// Completion wait poll interval.
    #[must_use]
    pub fn wait_poll(&self) -> Duration {
        Duration::from_millis(self.wait_poll_ms)
    }

    /// Cancellation grace period.
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Close settle period.
    #[must_use]
    pub fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_ms)
    }

    /// Process shutdown window.
    #[must_use]
    pub fn shutdown(&self) -> Duration {
        Duration::from_millis(self.shutdown_ms)
    }
}

fn default_editor() -> String {
    "code".into()
}

fn default_credential_setting() -> String {
    "openRouterApiKey".into()
}

fn default_socket_root() -> PathBuf {
    env::temp_dir().join("evals")
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root of the exercises checkout; holds `<language>/<exercise>` and `prompts/`.
    pub exercises_root: PathBuf,
    /// `SQLite` database file. Defaults to `<exercises_root>/.evals/evals.db`.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Directory for per-task JSONL logs. Defaults to `<exercises_root>/.evals/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Directory under which per-task IPC sockets are created.
    #[serde(default = "default_socket_root")]
    pub socket_root: PathBuf,
    /// Editor binary launched for each task.
    #[serde(default = "default_editor")]
    pub editor: String,
    /// Whether the editor runs headless inside a container.
    #[serde(default)]
    pub containerized: bool,
    /// Configuration key that receives the API credential.
    #[serde(default = "default_credential_setting")]
    pub credential_setting: String,
    /// Base agent settings; run and task settings override these.
    #[serde(default)]
    pub settings: toml::Table,
    /// Timing configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// API credential injected into every task (populated at runtime).
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the agent API credential from OS keychain with env-var fallback.
    ///
    /// Tries the `evals-runner` keyring service first, then falls back to
    /// the `OPENROUTER_API_KEY` environment variable.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if neither source provides the credential.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.api_key = Some(load_credential("openrouter_api_key", "OPENROUTER_API_KEY").await?);
        Ok(())
    }

    /// Effective database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.exercises_root.join(".evals").join("evals.db"))
    }

    /// Effective task log directory.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.exercises_root.join(".evals").join("logs"))
    }

    /// Workspace directory for one exercise.
    #[must_use]
    pub fn workspace_path(&self, language: &str, exercise: &str) -> PathBuf {
        self.exercises_root.join(language).join(exercise)
    }

    /// Prompt file sent to the agent for every exercise of `language`.
    #[must_use]
    pub fn prompt_path(&self, language: &str) -> PathBuf {
        self.exercises_root
            .join("prompts")
            .join(format!("{language}.md"))
    }

    /// Base agent settings as a JSON object.
    #[must_use]
    pub fn base_settings(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(&self.settings) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.timeouts.task_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.task_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.connect_attempts == 0 {
            return Err(AppError::Config(
                "timeouts.connect_attempts must be greater than zero".into(),
            ));
        }

        if self.timeouts.jitter_min_ms > self.timeouts.jitter_max_ms {
            return Err(AppError::Config(
                "timeouts.jitter_min_ms must not exceed timeouts.jitter_max_ms".into(),
            ));
        }

        if self.editor.trim().is_empty() {
            return Err(AppError::Config("editor must not be empty".into()));
        }

        let canonical_root = self
            .exercises_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("exercises_root invalid: {err}")))?;
        self.exercises_root = canonical_root;

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<String> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(value),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            warn!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    match env::var(env_key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AppError::Config(format!(
            "credential {keyring_key} not found in keychain or {env_key} env var"
        ))),
    }
}
