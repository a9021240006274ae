//! Shared vocabulary of the orchestration layer: sub-agent requests, ledger
//! entries, and chat-agent listings. Everything derives [`serde::Serialize`]
//! so it can be logged or shown to the model as JSON.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::HandlerError;

/// Unique identifier for a sub-agent (UUID v4 string).
pub type SubAgentId = String;

/// What a parent asks of a new sub-agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubAgentRequest {
    pub name: String,
    pub role: String,
    pub goals: Vec<String>,
    /// Seeded as the child's only history record. May be empty.
    pub seed_context: String,
}

impl SubAgentRequest {
    /// Build a request from `start_sub_agent` arguments. The expected answer
    /// format becomes a second goal.
    pub fn from_args(args: &Map<String, Value>) -> Result<Self, HandlerError> {
        let required = |key: &'static str| {
            args.get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .ok_or(HandlerError::MissingArgument(key))
        };
        let optional = |key: &str| match args.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        let mut goals = vec![required("goal")?];
        let respond_with = optional("respond_with");
        if !respond_with.trim().is_empty() {
            goals.push(format!("You must respond with {respond_with}"));
        }

        Ok(Self {
            name: required("name")?,
            role: optional("role"),
            goals,
            seed_context: optional("data"),
        })
    }
}

/// Lifecycle status of a spawned sub-agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SubAgentStatus {
    Running,
    Completed,
    /// Aborted, or stopped on a limit without an answer.
    Failed(String),
}

/// Ledger entry for one sub-agent.
#[derive(Clone, Debug, Serialize)]
pub struct SubAgentInfo {
    pub id: SubAgentId,
    pub name: String,
    pub role: String,
    /// Nesting depth (root agent = 0, its children = 1).
    pub depth: usize,
    pub status: SubAgentStatus,
    /// ISO 8601 timestamp when the sub-agent started.
    pub spawned_at: String,
    pub completed_at: Option<String>,
}

/// Listing entry for a keyed chat agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatAgentInfo {
    pub key: u32,
    pub name: String,
    pub task: String,
}
