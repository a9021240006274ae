use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use autoloop::agent::agent_loop::{AgentLoop, AgentServices, LoopExit};
use autoloop::agent::builtin::{register_builtins, BuiltinContext};
use autoloop::agent::commands::{CapabilityScope, CommandRegistry};
use autoloop::agent::logging::{SessionLogger, LOG_DIR_NAME};
use autoloop::cli::{Cli, Commands};
use autoloop::config::{self, AppConfig};
use autoloop::console::StdConsole;
use autoloop::llm::genai_client::check_ollama_ready;
use autoloop::llm::{GenaiModelClient, ModelClient};
use autoloop::memory::{LocalMemory, MemoryStore};
use autoloop::orchestration::manager::AgentManager;
use autoloop::safety::defaults::SUB_AGENT_BLOCK_LIST;
use autoloop::safety::SafetyLayer;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Logs go to stderr; stdout carries only the final answer.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("Autoloop starting");

    let config = Arc::new(config::load_config(&cli)?);
    tracing::info!(
        model = %config.smart_model,
        fast_model = %config.fast_model,
        workspace = %config.workspace.display(),
        "Config loaded"
    );

    match cli.command {
        Commands::Run { .. } => run(config).await,
        Commands::Commands { sub_agent, .. } => {
            list_commands(&config, sub_agent)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: Arc<AppConfig>) -> anyhow::Result<ExitCode> {
    if let Some(url) = &config.ollama_url {
        check_ollama_ready(url, &config.smart_model).await?;
    }

    let safety = Arc::new(SafetyLayer::new(&config)?);
    tracing::info!(
        workspace = %safety.workspace_root().display(),
        timeout_secs = config.shell_timeout_secs,
        blocklist_patterns = config.blocked_patterns.len(),
        shell_enabled = config.execute_local_commands,
        "Safety layer initialized"
    );

    let client: Arc<dyn ModelClient> = Arc::new(GenaiModelClient::new(config.request_timeout_secs));
    let memory = open_memory(&config);
    let registry = build_registry(&config, &safety, &memory, &client);

    let logger = match SessionLogger::new(&config.workspace) {
        Ok(logger) => {
            tracing::info!(path = %logger.log_path().display(), "Session log opened");
            Some(logger)
        }
        Err(e) => {
            tracing::warn!("Session logging disabled: {e}");
            None
        }
    };

    let services = AgentServices::new(config.clone(), client, Arc::new(registry), safety);
    let mut agent = AgentLoop::root(services, memory, logger).await;
    let mut console = StdConsole::new();

    tokio::select! {
        outcome = agent.run(&mut console) => {
            let outcome = outcome?;
            tracing::info!(turns = outcome.turns, reason = ?outcome.reason, "Run finished");
            match outcome.exit {
                LoopExit::Done => {
                    println!("{}", outcome.output);
                    Ok(ExitCode::SUCCESS)
                }
                LoopExit::Aborted => {
                    eprintln!("Aborted: {}", outcome.output);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted.");
            Ok(ExitCode::from(130))
        }
    }
}

/// Long-term memory persisted next to the session logs, or an in-process
/// store if that file cannot be used.
fn open_memory(config: &AppConfig) -> Arc<dyn MemoryStore> {
    let Some(parent) = config.workspace.parent() else {
        return Arc::new(LocalMemory::ephemeral());
    };
    let dir = parent.join(LOG_DIR_NAME);
    let opened = std::fs::create_dir_all(&dir)
        .map_err(anyhow::Error::from)
        .and_then(|()| LocalMemory::persistent(&dir.join("memory.jsonl")));
    match opened {
        Ok(memory) => Arc::new(memory),
        Err(e) => {
            tracing::warn!("Using in-memory store only: {e}");
            Arc::new(LocalMemory::ephemeral())
        }
    }
}

fn build_registry(
    config: &AppConfig,
    safety: &Arc<SafetyLayer>,
    memory: &Arc<dyn MemoryStore>,
    client: &Arc<dyn ModelClient>,
) -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    register_builtins(
        &mut registry,
        &BuiltinContext {
            safety: safety.clone(),
            memory: memory.clone(),
            agents: AgentManager::new(client.clone(), config.fast_model.clone(), config.reply_token_reserve),
            client: client.clone(),
            ask_model: config.smart_model.clone(),
            ask_token_budget: config.reply_token_reserve,
            execute_local_commands: config.execute_local_commands,
        },
    );
    registry
}

fn list_commands(config: &AppConfig, sub_agent: bool) -> anyhow::Result<()> {
    let safety = Arc::new(SafetyLayer::new(config)?);
    let client: Arc<dyn ModelClient> = Arc::new(GenaiModelClient::new(config.request_timeout_secs));
    let memory: Arc<dyn MemoryStore> = Arc::new(LocalMemory::ephemeral());
    let registry = build_registry(config, &safety, &memory, &client);

    let mut scope = CapabilityScope::root(&registry, config.root_blocked_commands.as_slice());
    if sub_agent {
        scope = scope
            .without(SUB_AGENT_BLOCK_LIST)
            .without(config.sub_agent_blocked_commands.as_slice());
    }
    println!("{}", registry.render_prompt_list(&scope));
    Ok(())
}
