//! Wiring shared by the end-to-end tests: a root agent over a temporary
//! workspace, driven by a scripted model.

use std::sync::Arc;

use autoloop::agent::agent_loop::{AgentLoop, AgentServices};
use autoloop::agent::builtin::{register_builtins, BuiltinContext};
use autoloop::agent::commands::CommandRegistry;
use autoloop::agent::logging::SessionLogger;
use autoloop::config::PartialConfig;
use autoloop::llm::{ModelClient, ScriptedModel};
use autoloop::memory::{LocalMemory, MemoryStore};
use autoloop::orchestration::manager::AgentManager;
use autoloop::safety::SafetyLayer;
use tempfile::TempDir;

pub struct Harness {
    pub tmp: TempDir,
    pub model: Arc<ScriptedModel>,
    pub memory: Arc<LocalMemory>,
}

impl Harness {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tmp: tempfile::tempdir().expect("failed to create temp dir"),
            model: Arc::new(ScriptedModel::new(replies)),
            memory: Arc::new(LocalMemory::ephemeral()),
        }
    }

    pub fn workspace(&self) -> std::path::PathBuf {
        self.tmp.path().join("ws")
    }

    /// Root agent with every built-in registered.
    pub async fn agent(&self, partial: PartialConfig, with_log: bool) -> AgentLoop {
        let config = Arc::new(
            PartialConfig {
                workspace: Some(self.workspace()),
                ..partial
            }
            .finalize(),
        );
        let safety = Arc::new(SafetyLayer::new(&config).unwrap());
        let client: Arc<dyn ModelClient> = self.model.clone();
        let memory: Arc<dyn MemoryStore> = self.memory.clone();

        let mut registry = CommandRegistry::new();
        register_builtins(
            &mut registry,
            &BuiltinContext {
                safety: safety.clone(),
                memory: memory.clone(),
                agents: AgentManager::new(client.clone(), "fast", 200),
                client: client.clone(),
                ask_model: "smart".to_string(),
                ask_token_budget: 200,
                execute_local_commands: config.execute_local_commands,
            },
        );

        let logger = with_log.then(|| SessionLogger::new(&config.workspace).unwrap());
        let services = AgentServices::new(config, client, Arc::new(registry), safety);
        AgentLoop::root(services, memory, logger).await
    }
}

pub fn continuous() -> PartialConfig {
    PartialConfig {
        continuous: Some(true),
        ..PartialConfig::default()
    }
}

/// Contents of the records the loop stored as command results.
pub fn results(agent: &AgentLoop) -> Vec<String> {
    agent
        .session()
        .history()
        .iter()
        .filter(|r| r.kind == autoloop::agent::session::RecordKind::CommandResult)
        .map(|r| r.content.clone())
        .collect()
}
