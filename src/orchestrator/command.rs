//! Editor invocation builder.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Environment variable through which the editor learns its IPC socket path.
pub const SOCKET_PATH_ENV: &str = "ROO_CODE_IPC_SOCKET_PATH";

/// User data directory of the headless editor inside the container image.
const CONTAINER_USER_DATA_DIR: &str = "/roo/.vscode";

/// Shell command line plus the environment it must run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    /// Command line passed to `sh -c`.
    pub command: String,
    /// Extra environment variables for the process.
    pub env: HashMap<String, String>,
}

/// Socket path for one task: `<socket_root>/<run_id>/<task_id>.sock`.
#[must_use]
pub fn socket_path(socket_root: &Path, run_id: i64, task_id: i64) -> PathBuf {
    socket_root
        .join(run_id.to_string())
        .join(format!("{task_id}.sock"))
}

/// Build the editor invocation for `workspace`.
///
/// Containerized mode runs the editor under a virtual display with GPU and
/// sandboxing disabled and a fixed user data directory. Interactive mode is
/// the bare editor with workspace trust disabled.
#[must_use]
pub fn build_command(
    editor: &str,
    workspace: &Path,
    containerized: bool,
    socket_path: &Path,
) -> LaunchCommand {
    let workspace = shell_quote(&workspace.display().to_string());

    let command = if containerized {
        format!(
            "xvfb-run --auto-servernum --server-num=1 {editor} --wait --log trace \
             --disable-workspace-trust --disable-gpu --disable-lcd-text --no-sandbox \
             --user-data-dir {CONTAINER_USER_DATA_DIR} --password-store=basic -n {workspace}"
        )
    } else {
        format!("{editor} --disable-workspace-trust -n {workspace}")
    };

    let env = HashMap::from([(
        SOCKET_PATH_ENV.to_owned(),
        socket_path.display().to_string(),
    )]);

    LaunchCommand { command, env }
}

/// Single-quote `value` for POSIX `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
