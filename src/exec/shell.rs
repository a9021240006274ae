use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use crate::error::ExecError;

/// Result of a shell command execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

/// Run `command` through `sh -c` inside `workdir`, killing the whole process
/// group if it outlives `timeout_secs`.
///
/// A timed-out run is not an error: it returns whatever output was captured
/// with `timed_out = true` and no exit code.
pub async fn execute_shell(
    command: &str,
    workdir: &Path,
    timeout_secs: u64,
) -> Result<ExecResult, ExecError> {
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ExecError::SpawnFailed(e.to_string()))?;

    let stdout_task = tokio::spawn(read_all(child.stdout.take()));
    let stderr_task = tokio::spawn(read_all(child.stderr.take()));

    let waited = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()).await;

    let (exit_code, timed_out) = match waited {
        Ok(status) => {
            let status = status.map_err(|e| ExecError::ProcessFailed(e.to_string()))?;
            (status.code(), false)
        }
        Err(_) => {
            if let Some(pid) = child.id() {
                // The shell leads its own group, so this reaches everything it forked.
                if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                    tracing::warn!(pid, "Failed to kill timed-out process group: {e}");
                }
            }
            // Reap so no zombie is left behind.
            let _ = child.wait().await;
            tracing::warn!(command, timeout_secs, "Shell command timed out");
            (None, true)
        }
    };

    let stdout = stdout_task.await.unwrap_or_default();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(ExecResult {
        stdout,
        stderr,
        exit_code,
        timed_out,
    })
}

async fn read_all<R: AsyncRead + Unpin>(stream: Option<R>) -> String {
    let Some(mut stream) = stream else {
        return String::new();
    };
    let mut buf = Vec::new();
    if let Err(e) = stream.read_to_end(&mut buf).await {
        tracing::debug!("Stopped reading process output: {e}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}
