//! JSONL session logger for full session replay.
//!
//! Writes structured events to timestamped JSONL files stored alongside the
//! workspace directory (not inside it). A root session produces
//! `session-{timestamp}.jsonl` in `{workspace_parent}/.autoloop-logs/`;
//! each sub-agent logs into its own `sub-{id}/` directory below that.
//!
//! Uses synchronous `std::fs` since writes are small and flushed after each
//! event.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;

/// Directory name used for logs, created next to the workspace.
pub const LOG_DIR_NAME: &str = ".autoloop-logs";

/// Returns the current UTC time as an ISO 8601 string with milliseconds.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// A structured log entry serialized as a single JSON line.
///
/// Tagged with `event_type` so each line is self-describing for replay.
#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum LogEntry {
    SessionStart {
        timestamp: String,
        agent: String,
        model: String,
        workspace: String,
        depth: usize,
    },

    /// Raw model reply, before any repair.
    ModelReply {
        timestamp: String,
        turn: u64,
        content: String,
    },

    /// A reply that could not be turned into a plan.
    RepairFailure {
        timestamp: String,
        turn: u64,
        reason: String,
    },

    CommandCall {
        timestamp: String,
        turn: u64,
        name: String,
        args: serde_json::Value,
        /// How the command was approved: "console", "pre_authorized", "continuous".
        authorized_by: String,
    },

    CommandResult {
        timestamp: String,
        turn: u64,
        name: String,
        succeeded: bool,
        output: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        fatal: bool,
    },

    /// Operator input that replaced a command.
    HumanFeedback {
        timestamp: String,
        turn: u64,
        text: String,
    },

    /// A system-role message the loop added to history.
    SystemMessage {
        timestamp: String,
        content: String,
    },

    SubAgentSpawned {
        timestamp: String,
        id: String,
        name: String,
        log_dir: String,
    },

    Error {
        timestamp: String,
        turn: u64,
        message: String,
    },

    SessionEnd {
        timestamp: String,
        total_turns: u64,
        reason: String,
    },
}

/// Append-only JSONL logger for one agent.
pub struct SessionLogger {
    writer: BufWriter<fs::File>,
    log_dir: PathBuf,
    log_path: PathBuf,
}

impl SessionLogger {
    /// Logger for a root session. The directory is
    /// `{workspace_parent}/.autoloop-logs/`.
    pub fn new(workspace_path: &Path) -> anyhow::Result<Self> {
        Self::new_in_dir(&Self::log_dir_for(workspace_path)?)
    }

    /// Logger writing a fresh session file into `log_dir`, created if needed.
    pub fn new_in_dir(log_dir: &Path) -> anyhow::Result<Self> {
        fs::create_dir_all(log_dir)?;

        // Colons are not portable in filenames.
        let session_id = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let log_path = log_dir.join(format!("session-{session_id}.jsonl"));

        let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

        Ok(Self {
            writer: BufWriter::new(file),
            log_dir: log_dir.to_path_buf(),
            log_path,
        })
    }

    fn log_dir_for(workspace_path: &Path) -> anyhow::Result<PathBuf> {
        let parent = workspace_path.parent().ok_or_else(|| {
            anyhow::anyhow!(
                "Workspace path '{}' has no parent directory",
                workspace_path.display()
            )
        })?;
        Ok(parent.join(LOG_DIR_NAME))
    }

    /// Serialize a log entry as a single JSON line and flush.
    pub fn log_event(&mut self, event: &LogEntry) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }

    /// Like [`SessionLogger::log_event`], but a failed write only warns.
    /// Logging never stops an agent.
    pub fn record(&mut self, event: LogEntry) {
        if let Err(e) = self.log_event(&event) {
            tracing::warn!(path = %self.log_path.display(), "Failed to write session log: {e}");
        }
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Directory for the logs of a sub-agent spawned from this session.
    pub fn sub_agent_dir(&self, id: &str) -> PathBuf {
        self.log_dir.join(format!("sub-{id}"))
    }
}
