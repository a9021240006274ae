pub mod command_filter;
pub mod defaults;
pub mod workspace;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use command_filter::{BlockedCommand, CommandFilter};
use workspace::WorkspaceGuard;

use crate::config::AppConfig;
use crate::exec::{execute_shell, ExecResult};

/// Exit code reported for a shell line the filter refused.
const BLOCKED_EXIT_CODE: i32 = 126;

/// Guardrails around everything an agent can touch: the workspace sandbox
/// for path arguments and the blocklist for shell lines.
///
/// Shell execution goes through [`SafetyLayer::execute`] only; nothing else
/// calls [`execute_shell`].
pub struct SafetyLayer {
    filter: CommandFilter,
    workspace: WorkspaceGuard,
    shell_timeout_secs: u64,
    security_log: PathBuf,
}

/// One line of the security log.
#[derive(Serialize)]
struct SecurityLogEntry<'a> {
    timestamp: String,
    blocked: bool,
    reason: &'a str,
    command: &'a str,
}

impl SafetyLayer {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let filter = CommandFilter::new(&config.blocked_patterns)
            .context("Failed to compile command filter patterns")?;
        let workspace = WorkspaceGuard::with_restriction(&config.workspace, config.restrict_to_workspace)
            .with_context(|| format!("Failed to prepare workspace {}", config.workspace.display()))?;

        Ok(Self {
            filter,
            workspace,
            shell_timeout_secs: config.shell_timeout_secs,
            security_log: config.security_log_path.clone(),
        })
    }

    /// Run `command` in the workspace unless the blocklist refuses it.
    ///
    /// A refused line never reaches the shell: it is appended to the security
    /// log and comes back with exit code 126 and the block reason as JSON in
    /// `stderr`.
    pub async fn execute(&self, command: &str) -> anyhow::Result<ExecResult> {
        if let Some(blocked) = self.filter.check(command) {
            tracing::warn!(reason = %blocked.reason, "Shell command blocked");
            self.record_blocked(&blocked);
            return Ok(ExecResult {
                stdout: String::new(),
                stderr: blocked.to_json(),
                exit_code: Some(BLOCKED_EXIT_CODE),
                timed_out: false,
            });
        }

        let result = execute_shell(command, self.workspace.canonical_root(), self.shell_timeout_secs).await?;
        Ok(result)
    }

    pub fn workspace(&self) -> &WorkspaceGuard {
        &self.workspace
    }

    pub fn workspace_root(&self) -> &Path {
        self.workspace.canonical_root()
    }

    /// Failure to write the log only warns; the command stays blocked.
    fn record_blocked(&self, blocked: &BlockedCommand) {
        let entry = SecurityLogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            blocked: true,
            reason: &blocked.reason,
            command: &blocked.command,
        };
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.security_log)
            .and_then(|mut file| {
                let line = serde_json::to_string(&entry)?;
                writeln!(file, "{line}")
            });
        if let Err(e) = written {
            tracing::warn!(path = %self.security_log.display(), "Failed to write security log: {e}");
        }
    }
}
