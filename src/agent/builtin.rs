//! Built-in command handlers.
//!
//! File commands are confined to the workspace, the shell command goes
//! through [`SafetyLayer::execute`], memory commands use the root agent's
//! store, and the chat-agent commands drive the shared [`AgentManager`].
//! Handlers report problems as [`HandlerError`]; dispatch turns those into
//! failed results.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use walkdir::WalkDir;

use super::commands::{CommandHandler, CommandRegistry, CommandSpec};
use crate::error::{GuardrailError, HandlerError};
use crate::llm::{ChatMessage, ModelClient};
use crate::memory::MemoryStore;
use crate::orchestration::manager::AgentManager;
use crate::safety::SafetyLayer;

/// Everything the built-in handlers need from the outside world.
#[derive(Clone)]
pub struct BuiltinContext {
    pub safety: Arc<SafetyLayer>,
    pub memory: Arc<dyn MemoryStore>,
    pub agents: AgentManager,
    pub client: Arc<dyn ModelClient>,
    /// Model and reply budget used by `ask_model`.
    pub ask_model: String,
    pub ask_token_budget: usize,
    pub execute_local_commands: bool,
}

/// Register every built-in handler.
pub fn register_builtins(registry: &mut CommandRegistry, ctx: &BuiltinContext) {
    registry.register(ReadFile(ctx.safety.clone()));
    registry.register(WriteFile(ctx.safety.clone()));
    registry.register(AppendFile(ctx.safety.clone()));
    registry.register(DeleteFile(ctx.safety.clone()));
    registry.register(FileExists(ctx.safety.clone()));
    registry.register(SearchFiles(ctx.safety.clone()));
    registry.register(ExecuteShell {
        safety: ctx.safety.clone(),
        enabled: ctx.execute_local_commands,
    });
    registry.register(DoNothing);
    registry.register(MemorySave(ctx.memory.clone()));
    registry.register(MemoryLoad(ctx.memory.clone()));
    registry.register(AskModel {
        client: ctx.client.clone(),
        model: ctx.ask_model.clone(),
        token_budget: ctx.ask_token_budget,
    });
    registry.register(StartAgent(ctx.agents.clone()));
    registry.register(MessageAgent(ctx.agents.clone()));
    registry.register(ListAgents(ctx.agents.clone()));
    registry.register(DeleteAgent(ctx.agents.clone()));
}

fn str_arg<'a>(args: &'a Map<String, Value>, key: &'static str) -> Result<&'a str, HandlerError> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or(HandlerError::MissingArgument(key))
}

/// A key may arrive as a number or a numeric string.
fn key_arg(args: &Map<String, Value>) -> Result<String, HandlerError> {
    match args.get("key") {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(HandlerError::MissingArgument("key")),
    }
}

// ---- Files ----

/// The target path, named `file` in the prompt; `filename` is accepted too.
fn path_arg(args: &Map<String, Value>) -> Result<&str, HandlerError> {
    ["file", "filename"]
        .iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .ok_or(HandlerError::MissingArgument("file"))
}

fn sandboxed(safety: &SafetyLayer, args: &Map<String, Value>) -> Result<PathBuf, HandlerError> {
    Ok(safety.workspace().resolve(path_arg(args)?)?)
}

/// Resolve a write target, creating its parent directories, and refuse it
/// if symlinks lead outside the workspace.
async fn writable(safety: &SafetyLayer, args: &Map<String, Value>) -> Result<PathBuf, HandlerError> {
    let path = sandboxed(safety, args)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if !safety.workspace().is_write_allowed(&path)? {
        return Err(GuardrailError::PathOutsideWorkspace {
            path,
            workspace: safety.workspace_root().to_path_buf(),
        }
        .into());
    }
    Ok(path)
}

struct ReadFile(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for ReadFile {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "read_file",
            label: "Read file",
            args: &["file"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let path = sandboxed(&self.0, args)?;
        Ok(tokio::fs::read_to_string(&path).await?)
    }
}

struct WriteFile(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for WriteFile {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "write_to_file",
            label: "Write to file",
            args: &["file", "text"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let text = str_arg(args, "text")?;
        let path = writable(&self.0, args).await?;
        tokio::fs::write(&path, text).await?;
        Ok("File written to successfully.".to_string())
    }
}

struct AppendFile(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for AppendFile {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "append_to_file",
            label: "Append to file",
            args: &["file", "text"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        use tokio::io::AsyncWriteExt;

        let text = str_arg(args, "text")?;
        let path = writable(&self.0, args).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(text.as_bytes()).await?;
        Ok("Text appended successfully.".to_string())
    }
}

struct DeleteFile(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for DeleteFile {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "delete_file",
            label: "Delete file",
            args: &["file"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let path = writable(&self.0, args).await?;
        tokio::fs::remove_file(&path).await?;
        Ok("File deleted successfully.".to_string())
    }
}

struct FileExists(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for FileExists {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "file_exists",
            label: "Check if a file exists",
            args: &["file"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let path = sandboxed(&self.0, args)?;
        let exists = tokio::fs::try_exists(&path).await?;
        let name = path_arg(args)?;
        Ok(if exists {
            format!("File {name} exists.")
        } else {
            format!("File {name} does not exist.")
        })
    }
}

struct SearchFiles(Arc<SafetyLayer>);

#[async_trait]
impl CommandHandler for SearchFiles {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "search_files",
            label: "Search files",
            args: &["directory"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let directory = match str_arg(args, "directory")? {
            "" | "/" => self.0.workspace_root().to_path_buf(),
            dir => self.0.workspace().resolve(dir)?,
        };
        let root = self.0.workspace_root().to_path_buf();

        let files = tokio::task::spawn_blocking(move || {
            let mut files: Vec<String> = WalkDir::new(&directory)
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
                .filter_map(Result::ok)
                .filter(|e| e.file_type().is_file())
                .map(|e| {
                    e.path()
                        .strip_prefix(&root)
                        .unwrap_or(e.path())
                        .display()
                        .to_string()
                })
                .collect();
            files.sort();
            files
        })
        .await
        .map_err(|e| HandlerError::Failed(format!("file search did not finish: {e}")))?;

        Ok(if files.is_empty() {
            "No files found.".to_string()
        } else {
            files.join("\n")
        })
    }
}

// ---- Shell ----

struct ExecuteShell {
    safety: Arc<SafetyLayer>,
    enabled: bool,
}

#[async_trait]
impl CommandHandler for ExecuteShell {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "execute_shell",
            label: "Execute Shell Command, non-interactive commands only",
            args: &["command_line"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        if !self.enabled {
            return Err(HandlerError::Failed(
                "You are not allowed to run local shell commands. To execute shell commands, \
                 execute_local_commands must be set to 'true' in your config. Do not attempt to \
                 bypass the restriction."
                    .to_string(),
            ));
        }
        let command = str_arg(args, "command_line")?;
        let result = self
            .safety
            .execute(command)
            .await
            .map_err(|e| HandlerError::Failed(format!("execute_shell failed: {e}")))?;
        serde_json::to_string(&result)
            .map_err(|e| HandlerError::Failed(format!("Failed to serialize exec result: {e}")))
    }
}

// ---- Misc ----

struct DoNothing;

#[async_trait]
impl CommandHandler for DoNothing {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "do_nothing",
            label: "Do Nothing",
            args: &[],
        }
    }

    async fn handle(&self, _args: &Map<String, Value>) -> Result<String, HandlerError> {
        Ok("No action performed.".to_string())
    }
}

struct MemorySave(Arc<dyn MemoryStore>);

#[async_trait]
impl CommandHandler for MemorySave {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "memory_save",
            label: "Save to long term memory",
            args: &["string"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let text = str_arg(args, "string")?;
        self.0.add(text);
        Ok(format!("Committing memory with string \"{text}\""))
    }
}

struct MemoryLoad(Arc<dyn MemoryStore>);

#[async_trait]
impl CommandHandler for MemoryLoad {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "memory_load",
            label: "Load from long term memory",
            args: &["query"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let found = self.0.get(str_arg(args, "query")?);
        Ok(if found.is_empty() {
            "No relevant memories found.".to_string()
        } else {
            found
        })
    }
}

struct AskModel {
    client: Arc<dyn ModelClient>,
    model: String,
    token_budget: usize,
}

#[async_trait]
impl CommandHandler for AskModel {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "ask_model",
            label: "Ask the language model a direct question",
            args: &["prompt"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let messages = [ChatMessage::user(str_arg(args, "prompt")?)];
        Ok(self
            .client
            .complete(&messages, self.token_budget, &self.model)
            .await?)
    }
}

// ---- Chat agents ----

struct StartAgent(AgentManager);

#[async_trait]
impl CommandHandler for StartAgent {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "start_agent",
            label: "Start a chat agent",
            args: &["name", "task", "prompt"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let name = str_arg(args, "name")?;
        let task = str_arg(args, "task")?;
        let prompt = str_arg(args, "prompt")?;
        let (key, reply) = self.0.create_agent(name, task, prompt).await?;
        Ok(format!("Agent {name} created with key {key}. First response: {reply}"))
    }
}

struct MessageAgent(AgentManager);

#[async_trait]
impl CommandHandler for MessageAgent {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "message_agent",
            label: "Message a chat agent",
            args: &["key", "message"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let key = key_arg(args)?;
        self.0.message_agent(&key, str_arg(args, "message")?).await
    }
}

struct ListAgents(AgentManager);

#[async_trait]
impl CommandHandler for ListAgents {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "list_agents",
            label: "List chat agents",
            args: &[],
        }
    }

    async fn handle(&self, _args: &Map<String, Value>) -> Result<String, HandlerError> {
        let lines: Vec<String> = self
            .0
            .list_agents()
            .into_iter()
            .map(|a| format!("{}: {}", a.key, a.name))
            .collect();
        Ok(format!("List of agents:\n{}", lines.join("\n")))
    }
}

struct DeleteAgent(AgentManager);

#[async_trait]
impl CommandHandler for DeleteAgent {
    fn spec(&self) -> CommandSpec {
        CommandSpec {
            name: "delete_agent",
            label: "Delete a chat agent",
            args: &["key"],
        }
    }

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
        let key = key_arg(args)?;
        let deleted = key
            .trim()
            .parse::<u32>()
            .map(|k| self.0.delete_agent(k))
            .unwrap_or(false);
        Ok(if deleted {
            format!("Agent {key} deleted.")
        } else {
            format!("Agent {key} does not exist.")
        })
    }
}
