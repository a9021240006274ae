//! Runs a sub-agent to completion on behalf of its parent.
//!
//! A child starts with a fresh history (optionally seeded with context from
//! the parent), its own ephemeral memory, and a capability scope narrowed
//! from the parent's. It shares the parent's model client, command registry,
//! console and token budget. The parent blocks until the child finishes.

use std::sync::Arc;

use serde_json::json;

use super::types::{SubAgentId, SubAgentInfo, SubAgentRequest, SubAgentStatus};
use crate::agent::agent_loop::{AgentLoop, AgentServices};
use crate::agent::commands::ExecutionResult;
use crate::agent::logging::{now_iso, LogEntry, SessionLogger};
use crate::agent::session::{AgentSession, RecordKind};
use crate::agent::system_prompt::{build_sub_agent_prompt, AgentProfile};
use crate::console::Console;
use crate::llm::Role;
use crate::memory::{LocalMemory, MemoryStore};
use crate::safety::defaults::SUB_AGENT_BLOCK_LIST;

/// Ledger of the sub-agents one parent has spawned.
#[derive(Debug, Default)]
pub struct SubAgentSpawner {
    ledger: Vec<SubAgentInfo>,
}

impl SubAgentSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every child spawned so far, oldest first.
    pub fn ledger(&self) -> &[SubAgentInfo] {
        &self.ledger
    }

    /// Run a child agent for `request` and turn its outcome into the
    /// parent's command result. An aborted child, or one stopped by a limit
    /// before answering, yields a failed result.
    pub async fn spawn(
        &mut self,
        services: &AgentServices,
        parent: &AgentSession,
        parent_depth: usize,
        parent_log: Option<&mut SessionLogger>,
        request: SubAgentRequest,
        console: &mut dyn Console,
    ) -> ExecutionResult {
        let id: SubAgentId = uuid::Uuid::new_v4().to_string();
        let depth = parent_depth + 1;

        let scope = parent
            .scope
            .without(SUB_AGENT_BLOCK_LIST)
            .without(services.config.sub_agent_blocked_commands.as_slice());
        let mut session = AgentSession::new(parent.authorization.for_child(), scope, parent.budget.clone());
        if !request.seed_context.trim().is_empty() {
            session.push(Role::User, RecordKind::Feedback, format!("Context: {}", request.seed_context));
        }

        let profile = AgentProfile {
            name: request.name.clone(),
            role: request.role.clone(),
            goals: request.goals.clone(),
        };
        let system_prompt = build_sub_agent_prompt(&profile, &services.registry.render_prompt_list(&session.scope));
        let memory: Arc<dyn MemoryStore> = Arc::new(LocalMemory::ephemeral());

        let logger = parent_log.and_then(|parent_log| {
            let dir = parent_log.sub_agent_dir(&id);
            parent_log.record(LogEntry::SubAgentSpawned {
                timestamp: now_iso(),
                id: id.clone(),
                name: request.name.clone(),
                log_dir: dir.display().to_string(),
            });
            match SessionLogger::new_in_dir(&dir) {
                Ok(logger) => Some(logger),
                Err(e) => {
                    tracing::warn!(id = %id, "Sub-agent logging disabled: {e}");
                    None
                }
            }
        });

        self.ledger.push(SubAgentInfo {
            id: id.clone(),
            name: request.name.clone(),
            role: request.role.clone(),
            depth,
            status: SubAgentStatus::Running,
            spawned_at: now_iso(),
            completed_at: None,
        });
        tracing::info!(id = %id, name = %request.name, depth, "Sub-agent spawned");
        console.show("SUB-AGENT:", &format!("Starting {} ({id})", request.name));

        let mut child = AgentLoop::new(
            services.clone(),
            profile,
            system_prompt,
            session,
            memory,
            logger,
            depth,
            Some(services.config.sub_agent_max_turns),
        );
        let outcome = child.run(&mut *console).await;

        let (status, result) = match outcome {
            Ok(outcome) if outcome.answered() => (SubAgentStatus::Completed, ExecutionResult::success(outcome.output)),
            Ok(outcome) => (
                SubAgentStatus::Failed(outcome.output.clone()),
                ExecutionResult::failure(format!(
                    "Sub-agent {} stopped without an answer: {}",
                    request.name, outcome.output
                )),
            ),
            Err(e) => (
                SubAgentStatus::Failed(e.to_string()),
                ExecutionResult::failure(format!("Sub-agent {} failed: {e}", request.name)),
            ),
        };
        tracing::info!(id = %id, status = ?status, "Sub-agent finished");
        console.show(
            "SUB-AGENT:",
            &format!("{} finished: {}", request.name, json!({"status": &status, "output": &result.output})),
        );

        if let Some(info) = self.ledger.iter_mut().find(|info| info.id == id) {
            info.status = status;
            info.completed_at = Some(now_iso());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::commands::{CapabilityScope, CommandRegistry};
    use crate::agent::session::{AuthorizationMode, TokenBudget};
    use crate::config::PartialConfig;
    use crate::console::ScriptedConsole;
    use crate::llm::{ModelClient, ScriptedModel};
    use crate::safety::SafetyLayer;
    use tempfile::TempDir;

    fn services(model: Arc<ScriptedModel>, tmp: &TempDir) -> AgentServices {
        let config = Arc::new(
            PartialConfig {
                workspace: Some(tmp.path().join("ws")),
                ..PartialConfig::default()
            }
            .finalize(),
        );
        let safety = Arc::new(SafetyLayer::new(&config).unwrap());
        let client: Arc<dyn ModelClient> = model;
        AgentServices::new(config, client, Arc::new(CommandRegistry::new()), safety)
    }

    fn parent() -> AgentSession {
        AgentSession::new(
            AuthorizationMode::Continuous,
            CapabilityScope::from_names(["task_complete", "send_final_response", "start_sub_agent", "human_feedback"]),
            TokenBudget::unlimited(),
        )
    }

    fn request(seed: &str) -> SubAgentRequest {
        SubAgentRequest {
            name: "Helper".to_string(),
            role: "answers questions".to_string(),
            goals: vec!["Answer".to_string()],
            seed_context: seed.to_string(),
        }
    }

    #[tokio::test]
    async fn answered_child_is_a_success() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "send_final_response", "args": {"response": "42"}}]}"#,
        ]));
        let services = services(model.clone(), &tmp);
        let mut spawner = SubAgentSpawner::new();

        let result = spawner
            .spawn(&services, &parent(), 0, None, request("the question"), &mut ScriptedConsole::default())
            .await;

        assert_eq!(result, ExecutionResult::success("42"));
        assert_eq!(spawner.ledger().len(), 1);
        assert_eq!(spawner.ledger()[0].status, SubAgentStatus::Completed);
        assert_eq!(spawner.ledger()[0].depth, 1);

        let messages = &model.calls()[0].messages;
        assert!(messages.iter().any(|m| m.content == "Context: the question"));
    }

    #[tokio::test]
    async fn child_scope_loses_blocked_commands() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "start_sub_agent", "args": {"name": "x", "goal": "y"}}]}"#,
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "fine"}}]}"#,
        ]));
        let services = services(model.clone(), &tmp);
        let mut spawner = SubAgentSpawner::new();

        let result = spawner
            .spawn(&services, &parent(), 0, None, request(""), &mut ScriptedConsole::default())
            .await;
        assert_eq!(result.output, "fine");

        let system = &model.calls()[0].messages[0].content;
        assert!(system.contains("\"human_feedback\""));
        assert!(!system.contains("\"start_sub_agent\""));
        let second = &model.calls()[1].messages;
        assert!(second
            .iter()
            .any(|m| m.content.starts_with("Command start_sub_agent returned: Unknown command")));
    }

    #[tokio::test]
    async fn child_hitting_turn_limit_fails() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::default());
        let mut services = services(model, &tmp);
        let mut config = (*services.config).clone();
        config.sub_agent_max_turns = 0;
        services.config = Arc::new(config);
        let mut spawner = SubAgentSpawner::new();

        let result = spawner
            .spawn(&services, &parent(), 0, None, request(""), &mut ScriptedConsole::default())
            .await;

        assert!(!result.succeeded);
        assert!(result.output.starts_with("Sub-agent Helper stopped without an answer"));
        assert!(matches!(spawner.ledger()[0].status, SubAgentStatus::Failed(_)));
        assert!(spawner.ledger()[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn child_logs_nest_under_parent() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
        ]));
        let services = services(model, &tmp);
        let mut parent_log = SessionLogger::new_in_dir(&tmp.path().join("logs")).unwrap();
        let mut spawner = SubAgentSpawner::new();

        spawner
            .spawn(
                &services,
                &parent(),
                0,
                Some(&mut parent_log),
                request(""),
                &mut ScriptedConsole::default(),
            )
            .await;

        let id = &spawner.ledger()[0].id;
        let dir = tmp.path().join("logs").join(format!("sub-{id}"));
        assert!(std::fs::read_dir(dir).unwrap().next().is_some());
        let parent_text = std::fs::read_to_string(parent_log.log_path()).unwrap();
        assert!(parent_text.contains("sub_agent_spawned"));
    }
}
