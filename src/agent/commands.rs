//! Command registry, capability scopes, and dispatch.
//!
//! A command name from the model is lowercased, mapped through a fixed
//! synonym table, checked against the caller's [`CapabilityScope`], and then
//! either handed back to the loop (control commands) or run by a registered
//! [`CommandHandler`]. Nothing here returns an error to the loop: every
//! problem becomes a failed [`ExecutionResult`] the model can read.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::context::estimate_tokens;
use crate::error::HandlerError;

/// Text every unknown-command result contains. The verifier's heuristic
/// looks for it.
pub const UNKNOWN_COMMAND_MARKER: &str = "Unknown command";

/// Names the model commonly invents, mapped to the real command.
const SYNONYMS: &[(&str, &str)] = &[
    ("write_file", "write_to_file"),
    ("ask_agent", "message_agent"),
    ("prompt_agent", "message_agent"),
    ("ask_gpt4", "ask_model"),
    ("save_to_db", "memory_save"),
    ("load_from_db", "memory_load"),
    ("shell", "execute_shell"),
    ("final_response", "send_final_response"),
];

/// Lowercase `name` and apply the synonym table.
pub fn canonical_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    SYNONYMS
        .iter()
        .find(|(seen, _)| *seen == lower)
        .map(|(_, actual)| (*actual).to_string())
        .unwrap_or(lower)
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// Outcome of running one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub output: String,
    /// Set by commands that end the run (`task_complete` and friends).
    pub raised_fatal: bool,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            raised_fatal: false,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: output.into(),
            raised_fatal: false,
        }
    }

    pub fn fatal(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            raised_fatal: true,
        }
    }

    pub fn unknown(name: &str) -> Self {
        Self::failure(format!(
            "{UNKNOWN_COMMAND_MARKER} '{name}'. Please refer to the 'COMMANDS' list for available \
             commands and only respond in the specified JSON format."
        ))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Static description of a command, used to render the prompt's command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub label: &'static str,
    pub args: &'static [&'static str],
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(|a| format!("\"{a}\": \"<{a}>\""))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}: \"{}\", args: {}", self.label, self.name, args)
    }
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn spec(&self) -> CommandSpec;

    async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError>;
}

/// Commands whose effect is on the loop itself rather than the outside world.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TaskComplete,
    SendFinalResponse,
    Abort,
    HumanFeedback,
    StartSubAgent,
}

impl ControlCommand {
    pub const ALL: [ControlCommand; 5] = [
        ControlCommand::TaskComplete,
        ControlCommand::SendFinalResponse,
        ControlCommand::Abort,
        ControlCommand::HumanFeedback,
        ControlCommand::StartSubAgent,
    ];

    pub fn spec(self) -> CommandSpec {
        match self {
            ControlCommand::TaskComplete => CommandSpec {
                name: "task_complete",
                label: "Task Complete (Shutdown)",
                args: &["reason"],
            },
            ControlCommand::SendFinalResponse => CommandSpec {
                name: "send_final_response",
                label: "Send final response and stop",
                args: &["response"],
            },
            ControlCommand::Abort => CommandSpec {
                name: "abort",
                label: "Abort the task",
                args: &["reason"],
            },
            ControlCommand::HumanFeedback => CommandSpec {
                name: "human_feedback",
                label: "Use the human's latest feedback",
                args: &[],
            },
            ControlCommand::StartSubAgent => CommandSpec {
                name: "start_sub_agent",
                label: "Delegate a task to a sub-agent and wait for its answer",
                args: &["name", "role", "goal", "respond_with", "data"],
            },
        }
    }

    /// Result for the control commands that need nothing from the loop.
    /// `None` for `human_feedback` and `start_sub_agent`.
    pub fn immediate_result(self, args: &Map<String, Value>) -> Option<ExecutionResult> {
        let text = |key: &str| match args.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        match self {
            ControlCommand::TaskComplete => Some(ExecutionResult::fatal(text("reason"))),
            ControlCommand::SendFinalResponse => Some(ExecutionResult::fatal(text("response"))),
            ControlCommand::Abort => Some(ExecutionResult::fatal(format!(
                "Aborting. Reason: {}",
                text("reason")
            ))),
            ControlCommand::HumanFeedback | ControlCommand::StartSubAgent => None,
        }
    }
}

// ---------------------------------------------------------------------------
// CapabilityScope
// ---------------------------------------------------------------------------

/// The set of command names an agent may dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityScope {
    names: BTreeSet<String>,
}

impl CapabilityScope {
    /// Every registered name minus `blocked`.
    pub fn root<S: AsRef<str>>(registry: &CommandRegistry, blocked: &[S]) -> Self {
        Self::from_names(registry.names()).without(blocked)
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// A narrower scope: this one minus `blocked`. Never widens.
    pub fn without<S: AsRef<str>>(&self, blocked: &[S]) -> Self {
        let mut names = self.names.clone();
        for name in blocked {
            names.remove(&canonical_name(name.as_ref()));
        }
        Self { names }
    }

    pub fn allows(&self, canonical: &str) -> bool {
        self.names.contains(canonical)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// What a command name turned into.
pub enum Resolution {
    Control(ControlCommand),
    Handler(Arc<dyn CommandHandler>),
    /// The model reported an error in place of a command name.
    ModelError,
    Unknown,
}

/// Lookup table from canonical command name to capability.
#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<&'static str, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler. A later handler with the same name replaces the earlier.
    pub fn register(&mut self, handler: impl CommandHandler + 'static) {
        let name = handler.spec().name;
        if self.handlers.insert(name, Arc::new(handler)).is_some() {
            tracing::warn!(command = name, "Command handler replaced");
        }
    }

    /// Every name this registry can resolve, control commands included.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = ControlCommand::ALL
            .iter()
            .map(|c| c.spec().name)
            .chain(self.handlers.keys().copied())
            .collect();
        names.sort_unstable();
        names
    }

    /// Resolve an already-canonical name within `scope`.
    pub fn resolve(&self, canonical: &str, scope: &CapabilityScope) -> Resolution {
        if canonical.starts_with("error") {
            return Resolution::ModelError;
        }
        if !scope.allows(canonical) {
            return Resolution::Unknown;
        }
        if let Some(control) = ControlCommand::ALL.iter().find(|c| c.spec().name == canonical) {
            return Resolution::Control(*control);
        }
        match self.handlers.get(canonical) {
            Some(handler) => Resolution::Handler(Arc::clone(handler)),
            None => Resolution::Unknown,
        }
    }

    /// Run `name` with `args` if `scope` permits it.
    ///
    /// Control commands that need the loop (`human_feedback`,
    /// `start_sub_agent`) cannot be completed here and come back as failures;
    /// the loop intercepts them before calling this.
    pub async fn dispatch(
        &self,
        name: &str,
        args: &Map<String, Value>,
        scope: &CapabilityScope,
    ) -> ExecutionResult {
        let canonical = canonical_name(name);
        match self.resolve(&canonical, scope) {
            Resolution::Handler(handler) => invoke(handler.as_ref(), &canonical, args).await,
            Resolution::Control(control) => control.immediate_result(args).unwrap_or_else(|| {
                ExecutionResult::failure(format!(
                    "Command {canonical} is only available inside an agent loop."
                ))
            }),
            Resolution::ModelError => model_error(name, args),
            Resolution::Unknown => ExecutionResult::unknown(name),
        }
    }

    /// Numbered command list for the system prompt, restricted to `scope`.
    pub fn render_prompt_list(&self, scope: &CapabilityScope) -> String {
        let mut specs: Vec<CommandSpec> = ControlCommand::ALL
            .iter()
            .map(|c| c.spec())
            .chain(self.handlers.values().map(|h| h.spec()))
            .filter(|spec| scope.allows(spec.name))
            .collect();
        specs.sort_by_key(|spec| spec.name);

        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| format!("{}. {spec}", i + 1))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run a handler, turning its error into a failed result.
pub async fn invoke(
    handler: &dyn CommandHandler,
    name: &str,
    args: &Map<String, Value>,
) -> ExecutionResult {
    tracing::debug!(command = name, "Dispatching command");
    match handler.handle(args).await {
        Ok(output) => ExecutionResult::success(output),
        Err(e) => {
            tracing::warn!(command = name, "Command handler failed: {e}");
            ExecutionResult::failure(format!("Error: {e}"))
        }
    }
}

/// Result for a model-emitted `error...` pseudo-command.
pub fn model_error(name: &str, args: &Map<String, Value>) -> ExecutionResult {
    ExecutionResult::failure(format!(
        "Command {name} threw the following error: {}",
        Value::Object(args.clone())
    ))
}

// ---------------------------------------------------------------------------
// Output budget
// ---------------------------------------------------------------------------

/// Downgrades results too large to fit in the next context alongside the
/// running summary.
#[derive(Debug, Clone, Copy)]
pub struct OutputBudget {
    pub limit: usize,
    pub margin: usize,
}

impl OutputBudget {
    pub fn exceeded_by(&self, output: &str, summary: &str) -> bool {
        estimate_tokens(output) + estimate_tokens(summary) + self.margin > self.limit
    }

    /// Return `result` unchanged, or a failure telling the model not to
    /// repeat the call if its output is over budget.
    pub fn enforce(&self, name: &str, result: ExecutionResult, summary: &str) -> ExecutionResult {
        if result.raised_fatal || !self.exceeded_by(&result.output, summary) {
            return result;
        }
        tracing::warn!(command = name, "Command output over budget");
        ExecutionResult::failure(format!(
            "Failure: command {name} returned too much output. Do not execute this command \
             again with the same arguments."
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl CommandHandler for Counting {
        fn spec(&self) -> CommandSpec {
            CommandSpec {
                name: "write_to_file",
                label: "Write to file",
                args: &["filename", "text"],
            }
        }

        async fn handle(&self, args: &Map<String, Value>) -> Result<String, HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("filename") {
                Some(_) => Ok("File written to successfully.".to_string()),
                None => Err(HandlerError::MissingArgument("filename")),
            }
        }
    }

    fn registry() -> (CommandRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CommandRegistry::new();
        registry.register(Counting {
            calls: Arc::clone(&calls),
        });
        (registry, calls)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn synonyms_and_case_are_normalized() {
        assert_eq!(canonical_name("Write_File"), "write_to_file");
        assert_eq!(canonical_name("prompt_agent"), "message_agent");
        assert_eq!(canonical_name("final_response"), "send_final_response");
        assert_eq!(canonical_name("read_file"), "read_file");
    }

    #[tokio::test]
    async fn synonym_reaches_the_real_handler() {
        let (registry, calls) = registry();
        let scope = CapabilityScope::root::<&str>(&registry, &[]);
        let result = registry
            .dispatch("write_file", &args(json!({"filename": "a"})), &scope)
            .await;
        assert!(result.succeeded);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_scope_name_fails_without_calling_handler() {
        let (registry, calls) = registry();
        let scope = CapabilityScope::root(&registry, &["write_to_file"]);

        let result = registry
            .dispatch("write_to_file", &args(json!({"filename": "a"})), &scope)
            .await;
        assert!(!result.succeeded);
        assert!(!result.raised_fatal);
        assert!(result.output.contains(UNKNOWN_COMMAND_MARKER));
        assert!(result.output.contains("'write_to_file'"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_name_is_unknown() {
        let (registry, _) = registry();
        let scope = CapabilityScope::from_names(["browse_website"]);
        let result = registry.dispatch("browse_website", &Map::new(), &scope).await;
        assert!(result.output.starts_with("Unknown command 'browse_website'"));
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let (registry, _) = registry();
        let scope = CapabilityScope::root::<&str>(&registry, &[]);
        let result = registry.dispatch("write_to_file", &Map::new(), &scope).await;
        assert!(!result.succeeded);
        assert_eq!(result.output, "Error: missing or invalid 'filename' argument");
    }

    #[tokio::test]
    async fn control_commands_are_fatal() {
        let (registry, _) = registry();
        let scope = CapabilityScope::root::<&str>(&registry, &[]);

        let done = registry
            .dispatch("task_complete", &args(json!({"reason": "done"})), &scope)
            .await;
        assert_eq!(done, ExecutionResult::fatal("done"));

        let aborted = registry
            .dispatch("abort", &args(json!({"reason": "stuck"})), &scope)
            .await;
        assert!(aborted.raised_fatal);
        assert_eq!(aborted.output, "Aborting. Reason: stuck");
    }

    #[tokio::test]
    async fn error_names_report_the_models_error() {
        let (registry, _) = registry();
        let scope = CapabilityScope::root::<&str>(&registry, &[]);
        let result = registry
            .dispatch("ERROR", &args(json!({"message": "bad"})), &scope)
            .await;
        assert!(!result.succeeded);
        assert_eq!(
            result.output,
            r#"Command ERROR threw the following error: {"message":"bad"}"#
        );
    }

    #[test]
    fn child_scope_never_widens() {
        let (registry, _) = registry();
        let root = CapabilityScope::root(&registry, &["abort"]);
        let child = root.without(&["start_sub_agent", "shell"]);

        assert!(!root.allows("abort"));
        assert!(!child.allows("abort"));
        assert!(!child.allows("start_sub_agent"));
        assert!(child.allows("write_to_file"));
        assert!(child.names().all(|n| root.allows(n)));
    }

    #[test]
    fn prompt_list_follows_scope() {
        let (registry, _) = registry();
        let scope = CapabilityScope::root(&registry, &["start_sub_agent"]);
        let list = registry.render_prompt_list(&scope);

        assert!(list.contains(r#"Write to file: "write_to_file", args: "filename": "<filename>", "text": "<text>""#));
        assert!(!list.contains("start_sub_agent"));
        assert!(list.starts_with("1. "));
    }

    #[test]
    fn output_budget_downgrades_at_one_token_over() {
        let budget = OutputBudget {
            limit: 10,
            margin: 6,
        };
        // 12 chars = 3 tokens, 4 chars = 1 token: 3 + 1 + 6 = 10, within limit.
        let ok = budget.enforce("x", ExecutionResult::success("a".repeat(12)), "abcd");
        assert!(ok.succeeded);

        // 13 chars = 4 tokens: one over.
        let over = budget.enforce("x", ExecutionResult::success("a".repeat(13)), "abcd");
        assert!(!over.succeeded);
        assert!(over.output.contains("returned too much output"));
    }
}
