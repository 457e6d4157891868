//! Shell command runner for `execute_terminal_command`.
//!
//! Runs one command string through the platform shell and captures its
//! output. Timeouts are applied by the caller; the child is spawned with
//! `kill_on_drop` so abandoning the future terminates the process.

use std::path::Path;
use std::process::Stdio;

use serde::Serialize;
use tokio::process::Command;

use crate::agent_core::cap_output;

/// Upper bound on each captured stream sent back to the model.
pub const MAX_OUTPUT_BYTES: usize = 16 * 1024;

/// What a finished command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    /// Only populated when the command exited unsuccessfully.
    pub stderr: String,
    pub exit_code: Option<i32>,
}

/// Build the platform shell invocation for `command`.
fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run `command` in `cwd` and wait for it to exit.
///
/// A non-zero exit is still `Ok`: the model needs to see the failure output.
/// `Err` means the shell itself could not be started.
pub async fn run_shell_command(command: &str, cwd: &Path) -> std::io::Result<CommandOutput> {
    let output = shell_command(command)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = if output.status.success() {
        String::new()
    } else {
        cap_output(&String::from_utf8_lossy(&output.stderr), MAX_OUTPUT_BYTES)
    };

    Ok(CommandOutput {
        stdout: cap_output(&stdout, MAX_OUTPUT_BYTES),
        stderr,
        exit_code: output.status.code(),
    })
}

/// Default working directory for commands: desktop, then home, then `.`.
pub fn default_working_directory() -> std::path::PathBuf {
    dirs::desktop_dir()
        .filter(|d| d.is_dir())
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| std::path::PathBuf::from("."))
}
