//! The plan → act → observe loop for one agent.
//!
//! Each pass asks the smart model for a plan, repairs the reply into a
//! [`Plan`], and walks its commands through authorization, execution and
//! recording. The loop is an explicit state machine; every transition is
//! traced at debug level.
//!
//! Recoverable problems (bad replies, provider errors, failed commands)
//! become history text for the model to react to. Only a fatal command, the
//! exit key, the provider-failure ceiling, and the turn and token limits end
//! a run.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::authorize::{self, AuthorizationInput};
use super::commands::{self, canonical_name, CapabilityScope, CommandRegistry, ControlCommand, ExecutionResult, OutputBudget, Resolution};
use super::context::{estimate_message_tokens, estimate_tokens, ContextWindow};
use super::logging::{now_iso, LogEntry, SessionLogger};
use super::plan::{Command, Plan};
use super::repair::ResponseRepair;
use super::session::{AgentSession, AuthorizationMode, RecordKind, Skip, TokenBudget};
use super::system_prompt::{build_root_prompt, load_operator_notes, AgentProfile};
use super::verify::Verifier;
use crate::config::{AppConfig, VerificationPolicy};
use crate::console::Console;
use crate::error::{AgentError, ProviderError};
use crate::llm::{ModelClient, Role};
use crate::memory::MemoryStore;
use crate::orchestration::spawner::SubAgentSpawner;
use crate::orchestration::types::SubAgentRequest;
use crate::safety::SafetyLayer;

/// History records consulted when looking up relevant memories.
const MEMORY_QUERY_RECORDS: usize = 9;

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

/// Collaborators shared by a root agent and all of its sub-agents.
#[derive(Clone)]
pub struct AgentServices {
    pub config: Arc<AppConfig>,
    pub client: Arc<dyn ModelClient>,
    pub registry: Arc<CommandRegistry>,
    pub safety: Arc<SafetyLayer>,
    pub repair: Arc<ResponseRepair>,
    pub verifier: Arc<Verifier>,
}

impl AgentServices {
    /// Wire up repair and verification from `config`, both on the fast model.
    pub fn new(
        config: Arc<AppConfig>,
        client: Arc<dyn ModelClient>,
        registry: Arc<CommandRegistry>,
        safety: Arc<SafetyLayer>,
    ) -> Self {
        let repair = ResponseRepair::with_model_fixer(
            client.clone(),
            config.fast_model.clone(),
            config.reply_token_reserve,
        );
        let verifier = Verifier::new(
            client.clone(),
            config.fast_model.clone(),
            config.verify_token_limit,
            config.verified_commands.iter().map(|c| canonical_name(c)),
        );
        Self {
            config,
            client,
            registry,
            safety,
            repair: Arc::new(repair),
            verifier: Arc::new(verifier),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Done,
    Aborted,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A command such as `task_complete` ended the run.
    FatalCommand,
    MaxTurns,
    BudgetExhausted,
    ExitKey,
    ConsoleClosed,
    ProviderFailures,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub exit: LoopExit,
    pub reason: StopReason,
    /// The fatal command's output, or a description of why the run stopped.
    pub output: String,
    pub turns: u64,
}

impl LoopOutcome {
    /// Whether the agent produced an answer of its own.
    pub fn answered(&self) -> bool {
        self.exit == LoopExit::Done && self.reason == StopReason::FatalCommand
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// How a command got past authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Approval {
    Console,
    PreAuthorized,
    Continuous,
}

impl Approval {
    fn as_str(self) -> &'static str {
        match self {
            Approval::Console => "console",
            Approval::PreAuthorized => "pre_authorized",
            Approval::Continuous => "continuous",
        }
    }
}

enum LoopState {
    AwaitPlan,
    HavePlan { plan: Plan, index: usize },
    Authorizing { plan: Plan, index: usize },
    Executing { plan: Plan, index: usize, approval: Approval },
    Recording { plan: Plan, index: usize, step: Step },
    Finished(LoopOutcome),
}

impl LoopState {
    fn label(&self) -> &'static str {
        match self {
            LoopState::AwaitPlan => "AWAIT_PLAN",
            LoopState::HavePlan { .. } => "HAVE_PLAN",
            LoopState::Authorizing { .. } => "AUTHORIZING",
            LoopState::Executing { .. } => "EXECUTING",
            LoopState::Recording { .. } => "RECORDING",
            LoopState::Finished(outcome) => match outcome.exit {
                LoopExit::Done => "DONE",
                LoopExit::Aborted => "ABORTED",
            },
        }
    }
}

/// What happened to one command, ready to be recorded.
struct Step {
    result: ExecutionResult,
    /// Operator text that replaced the command, if any.
    feedback: Option<String>,
    /// Whether the rest of the plan should still run.
    keep_going: bool,
}

enum Authorized {
    Approved(Approval),
    Feedback(String),
    Stop(StopReason),
}

// ---------------------------------------------------------------------------
// AgentLoop
// ---------------------------------------------------------------------------

pub struct AgentLoop {
    services: AgentServices,
    profile: AgentProfile,
    system_prompt: String,
    session: AgentSession,
    memory: Arc<dyn MemoryStore>,
    logger: Option<SessionLogger>,
    spawner: SubAgentSpawner,
    depth: usize,
    max_turns: Option<u64>,
    turns: u64,
    consecutive_failures: u32,
    last_reply: String,
}

impl AgentLoop {
    /// Assemble a loop from its parts. Sub-agents are built this way by the
    /// spawner; the operator's agent usually comes from [`AgentLoop::root`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        services: AgentServices,
        profile: AgentProfile,
        system_prompt: String,
        session: AgentSession,
        memory: Arc<dyn MemoryStore>,
        logger: Option<SessionLogger>,
        depth: usize,
        max_turns: Option<u64>,
    ) -> Self {
        Self {
            services,
            profile,
            system_prompt,
            session,
            memory,
            logger,
            spawner: SubAgentSpawner::new(),
            depth,
            max_turns,
            turns: 0,
            consecutive_failures: 0,
            last_reply: String::new(),
        }
    }

    /// The operator's agent, configured from [`AppConfig`].
    pub async fn root(services: AgentServices, memory: Arc<dyn MemoryStore>, logger: Option<SessionLogger>) -> Self {
        let config = services.config.clone();
        let profile = AgentProfile {
            name: config.agent_name.clone(),
            role: config.agent_role.clone(),
            goals: config.agent_goals.clone(),
        };
        let scope = CapabilityScope::root(&services.registry, config.root_blocked_commands.as_slice());
        let notes = load_operator_notes(services.safety.workspace_root()).await;
        let system_prompt =
            build_root_prompt(&profile, &services.registry.render_prompt_list(&scope), notes.as_deref());

        let authorization = if config.continuous {
            AuthorizationMode::Continuous
        } else {
            AuthorizationMode::Interactive { pre_authorized: 0 }
        };
        let session = AgentSession::new(authorization, scope, TokenBudget::new(config.token_budget));

        Self::new(services, profile, system_prompt, session, memory, logger, 0, config.max_turns)
    }

    pub fn session(&self) -> &AgentSession {
        &self.session
    }

    pub fn spawner(&self) -> &SubAgentSpawner {
        &self.spawner
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Run until the agent finishes, aborts, or hits a limit.
    ///
    /// Boxed because a sub-agent runs its own loop from inside this one.
    pub fn run<'a>(&'a mut self, console: &'a mut dyn Console) -> BoxFuture<'a, anyhow::Result<LoopOutcome>> {
        async move {
            self.log(LogEntry::SessionStart {
                timestamp: now_iso(),
                agent: self.profile.name.clone(),
                model: self.services.config.smart_model.clone(),
                workspace: self.services.safety.workspace_root().display().to_string(),
                depth: self.depth,
            });
            tracing::info!(agent = %self.profile.name, depth = self.depth, "Agent loop started");

            let mut state = LoopState::AwaitPlan;
            let outcome = loop {
                tracing::debug!(agent = %self.profile.name, state = state.label(), "Loop state");
                state = match state {
                    LoopState::AwaitPlan => self.await_plan().await,
                    LoopState::HavePlan { plan, index } => self.have_plan(plan, index, console),
                    LoopState::Authorizing { plan, index } => self.authorizing(plan, index, console).await?,
                    LoopState::Executing { plan, index, approval } => {
                        self.executing(plan, index, approval, console).await
                    }
                    LoopState::Recording { plan, index, step } => self.recording(plan, index, step, console),
                    LoopState::Finished(outcome) => break outcome,
                };
            };

            self.log(LogEntry::SessionEnd {
                timestamp: now_iso(),
                total_turns: self.turns,
                reason: format!("{:?}", outcome.reason),
            });
            tracing::info!(
                agent = %self.profile.name,
                exit = ?outcome.exit,
                reason = ?outcome.reason,
                turns = self.turns,
                "Agent loop finished"
            );
            Ok(outcome)
        }
        .boxed()
    }

    fn finish(&self, exit: LoopExit, reason: StopReason, output: impl Into<String>) -> LoopState {
        LoopState::Finished(LoopOutcome {
            exit,
            reason,
            output: output.into(),
            turns: self.turns,
        })
    }

    // ---- AWAIT_PLAN ----

    async fn await_plan(&mut self) -> LoopState {
        if let Some(limit) = self.max_turns {
            if self.turns >= limit {
                return self.finish(LoopExit::Done, StopReason::MaxTurns, format!("Reached the limit of {limit} turns."));
            }
        }
        if self.session.budget.is_exhausted() {
            return self.finish(LoopExit::Done, StopReason::BudgetExhausted, "Token budget exhausted.");
        }
        self.turns += 1;

        let reply = match self.request_reply().await {
            Ok(reply) => reply,
            Err(e) => return self.provider_failure(e),
        };

        match self.services.repair.repair(&reply).await {
            Ok(plan) => LoopState::HavePlan { plan, index: 0 },
            Err(failure) => {
                tracing::warn!(agent = %self.profile.name, "Unusable model reply: {failure}");
                self.log(LogEntry::RepairFailure {
                    timestamp: now_iso(),
                    turn: self.turns,
                    reason: failure.reason.clone(),
                });
                self.notice(format!(
                    "Your last reply could not be used: {failure}. Respond only with a JSON object \
                     in the format specified above, with a non-empty \"commands\" list."
                ));
                LoopState::AwaitPlan
            }
        }
    }

    async fn request_reply(&mut self) -> Result<String, ProviderError> {
        let config = &self.services.config;
        let history = self.session.history();
        let query = history
            .iter()
            .rev()
            .take(MEMORY_QUERY_RECORDS)
            .map(|r| r.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let memory = if query.is_empty() {
            String::new()
        } else {
            self.memory.get(&query)
        };

        let messages = ContextWindow {
            system_prompt: &self.system_prompt,
            memory: &memory,
            history,
            token_limit: config.smart_token_limit,
            reply_reserve: config.reply_token_reserve,
        }
        .build(chrono::Local::now());

        let reply = self
            .services
            .client
            .complete(&messages, config.reply_token_reserve, &config.smart_model)
            .await?;

        self.session
            .budget
            .charge(estimate_message_tokens(&messages) + estimate_tokens(&reply));
        self.consecutive_failures = 0;
        self.session.push_reply(reply.clone());
        self.log(LogEntry::ModelReply {
            timestamp: now_iso(),
            turn: self.turns,
            content: reply.clone(),
        });
        self.last_reply = reply.clone();
        Ok(reply)
    }

    fn provider_failure(&mut self, error: ProviderError) -> LoopState {
        self.consecutive_failures += 1;
        tracing::warn!(
            agent = %self.profile.name,
            failures = self.consecutive_failures,
            "Model call failed: {error}"
        );
        self.log(LogEntry::Error {
            timestamp: now_iso(),
            turn: self.turns,
            message: error.to_string(),
        });

        if self.consecutive_failures > self.services.config.max_consecutive_failures {
            return self.finish(
                LoopExit::Aborted,
                StopReason::ProviderFailures,
                format!(
                    "Giving up after {} consecutive model failures. Last error: {error}",
                    self.consecutive_failures
                ),
            );
        }
        self.notice(format!("The model call failed ({error}). Determine the next command again."));
        LoopState::AwaitPlan
    }

    // ---- HAVE_PLAN ----

    fn have_plan(&mut self, plan: Plan, index: usize, console: &mut dyn Console) -> LoopState {
        if index == 0 {
            for (label, text) in plan.thoughts.lines() {
                console.show(label, text);
            }
        }
        match plan.commands.get(index) {
            Some(command) => {
                console.show(
                    "NEXT ACTION:",
                    &format!("COMMAND = {}  ARGUMENTS = {}", command.name, Value::Object(command.args.clone())),
                );
                LoopState::Authorizing { plan, index }
            }
            None => {
                self.notice("ALL COMMANDS EXECUTED!");
                LoopState::AwaitPlan
            }
        }
    }

    // ---- AUTHORIZING ----

    async fn authorizing(&mut self, plan: Plan, index: usize, console: &mut dyn Console) -> anyhow::Result<LoopState> {
        let approval = match self.session.authorization.consume_skip() {
            Skip::Continuous => Some(Approval::Continuous),
            Skip::Credit => Some(Approval::PreAuthorized),
            Skip::No => None,
        };
        if let Some(approval) = approval {
            return Ok(LoopState::Executing { plan, index, approval });
        }

        Ok(match self.ask_console(&plan, console).await? {
            Authorized::Approved(approval) => LoopState::Executing { plan, index, approval },
            Authorized::Feedback(text) => {
                self.log(LogEntry::HumanFeedback {
                    timestamp: now_iso(),
                    turn: self.turns,
                    text: text.clone(),
                });
                let step = Step {
                    result: ExecutionResult::success(format!("Human feedback: {text}")),
                    feedback: Some(text),
                    keep_going: true,
                };
                LoopState::Recording { plan, index, step }
            }
            Authorized::Stop(StopReason::ConsoleClosed) => {
                self.finish(LoopExit::Aborted, StopReason::ConsoleClosed, "Console input closed.")
            }
            Authorized::Stop(reason) => self.finish(LoopExit::Aborted, reason, "Exiting at the operator's request."),
        })
    }

    async fn ask_console(&mut self, plan: &Plan, console: &mut dyn Console) -> anyhow::Result<Authorized> {
        let config = self.services.config.clone();
        let prompt = authorize::prompt_text(&config.authorise_key, &config.exit_key, &self.profile.name);

        loop {
            let Some(line) = console.read_line(&prompt).await.map_err(AgentError::Console)? else {
                return Ok(Authorized::Stop(StopReason::ConsoleClosed));
            };

            match authorize::parse_input(&line, &config.authorise_key, &config.exit_key) {
                AuthorizationInput::Approve => return Ok(Authorized::Approved(Approval::Console)),
                AuthorizationInput::ApproveMany(count) => {
                    self.session.authorization.set_pre_authorized(count);
                    return Ok(Authorized::Approved(Approval::Console));
                }
                AuthorizationInput::Exit => return Ok(Authorized::Stop(StopReason::ExitKey)),
                AuthorizationInput::Empty => continue,
                AuthorizationInput::Malformed(message) => console.show("WARNING:", &message),
                AuthorizationInput::Feedback(text) => {
                    self.session.set_last_user_input(text.clone());
                    return Ok(Authorized::Feedback(text));
                }
                AuthorizationInput::SelfFeedback => {
                    let messages = authorize::self_feedback_prompt(&self.profile.role, &plan.thoughts);
                    match self
                        .services
                        .client
                        .complete(&messages, config.reply_token_reserve, &config.fast_model)
                        .await
                    {
                        Ok(answer) => {
                            console.show("SELF FEEDBACK:", &answer);
                            if authorize::feedback_approves(&answer, &config.authorise_key) {
                                return Ok(Authorized::Approved(Approval::Console));
                            }
                            self.session.set_last_user_input(answer.clone());
                            return Ok(Authorized::Feedback(answer));
                        }
                        Err(e) => console.show("WARNING:", &format!("Self-feedback failed: {e}")),
                    }
                }
            }
        }
    }

    // ---- EXECUTING ----

    async fn executing(&mut self, plan: Plan, index: usize, approval: Approval, console: &mut dyn Console) -> LoopState {
        let command = plan.commands[index].clone();
        let canonical = canonical_name(&command.name);
        self.log(LogEntry::CommandCall {
            timestamp: now_iso(),
            turn: self.turns,
            name: canonical.clone(),
            args: Value::Object(command.args.clone()),
            authorized_by: approval.as_str().to_string(),
        });

        let mut args = command.args.clone();
        let result = match self.services.safety.workspace().resolve_path_args(&mut args) {
            Err(e) => ExecutionResult::failure(format!("Error: {e}")),
            Ok(()) => self.dispatch(&command, &canonical, &args, console).await,
        };

        let budget = OutputBudget {
            limit: self.services.config.fast_token_limit,
            margin: self.services.config.output_safety_margin,
        };
        let checked = budget.enforce(&canonical, result.clone(), &self.session.summary());
        if checked != result && approval == Approval::PreAuthorized {
            self.session.authorization.refund();
        }
        let mut result = checked;

        let mut keep_going = result.succeeded;
        if result.succeeded && !result.raised_fatal {
            let verified = self.services.verifier.judge(&canonical, &args, &result).await;
            if !verified {
                result.succeeded = false;
                keep_going = self.services.config.verification_policy == VerificationPolicy::Continue;
            }
        }

        let step = Step {
            result,
            feedback: None,
            keep_going,
        };
        LoopState::Recording { plan, index, step }
    }

    async fn dispatch(
        &mut self,
        command: &Command,
        canonical: &str,
        args: &serde_json::Map<String, Value>,
        console: &mut dyn Console,
    ) -> ExecutionResult {
        match self.services.registry.resolve(canonical, &self.session.scope) {
            Resolution::Control(ControlCommand::HumanFeedback) => ExecutionResult::success(format!(
                "Human feedback: {}",
                self.session.last_user_input().unwrap_or_default()
            )),
            Resolution::Control(ControlCommand::StartSubAgent) => {
                let request = match SubAgentRequest::from_args(args) {
                    Ok(request) => request,
                    Err(e) => return ExecutionResult::failure(format!("Error: {e}")),
                };
                self.spawner
                    .spawn(&self.services, &self.session, self.depth, self.logger.as_mut(), request, console)
                    .await
            }
            Resolution::Control(control) => control
                .immediate_result(args)
                .unwrap_or_else(|| ExecutionResult::unknown(&command.name)),
            Resolution::Handler(handler) => commands::invoke(handler.as_ref(), canonical, args).await,
            Resolution::ModelError => commands::model_error(&command.name, args),
            Resolution::Unknown => ExecutionResult::unknown(&command.name),
        }
    }

    // ---- RECORDING ----

    fn recording(&mut self, plan: Plan, index: usize, step: Step, console: &mut dyn Console) -> LoopState {
        let name = canonical_name(&plan.commands[index].name);
        let record = match &step.feedback {
            Some(_) => step.result.output.clone(),
            None => format!("Command {name} returned: {}", step.result.output),
        };

        console.show("SYSTEM:", &record);
        self.session.push(Role::System, RecordKind::CommandResult, record.clone());
        self.memory.add(&format!(
            "Assistant Reply: {} \nResult: {record} \nHuman Feedback: {} ",
            self.last_reply,
            step.feedback.as_deref().unwrap_or_default()
        ));
        self.session.note(&format!(
            "{name}: {}",
            if step.result.succeeded { "succeeded" } else { "failed" }
        ));
        self.log(LogEntry::CommandResult {
            timestamp: now_iso(),
            turn: self.turns,
            name: name.clone(),
            succeeded: step.result.succeeded,
            output: step.result.output.clone(),
            fatal: step.result.raised_fatal,
        });

        if step.result.raised_fatal {
            return self.finish(LoopExit::Done, StopReason::FatalCommand, step.result.output);
        }
        if !step.keep_going {
            self.notice(format!("THE {name} COMMAND FAILED, ABORTING PLAN."));
            return LoopState::AwaitPlan;
        }
        LoopState::HavePlan { plan, index: index + 1 }
    }

    // ---- Helpers ----

    fn notice(&mut self, text: impl Into<String>) {
        let text = text.into();
        self.log(LogEntry::SystemMessage {
            timestamp: now_iso(),
            content: text.clone(),
        });
        self.session.push_notice(text);
    }

    fn log(&mut self, event: LogEntry) {
        if let Some(logger) = self.logger.as_mut() {
            logger.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::builtin::{register_builtins, BuiltinContext};
    use crate::config::PartialConfig;
    use crate::console::ScriptedConsole;
    use crate::llm::ScriptedModel;
    use crate::memory::LocalMemory;
    use crate::orchestration::manager::AgentManager;
    use tempfile::TempDir;

    async fn root_loop(model: Arc<ScriptedModel>, partial: PartialConfig, tmp: &TempDir) -> AgentLoop {
        let config = Arc::new(
            PartialConfig {
                workspace: Some(tmp.path().join("ws")),
                ..partial
            }
            .finalize(),
        );
        let safety = Arc::new(SafetyLayer::new(&config).unwrap());
        let memory: Arc<dyn MemoryStore> = Arc::new(LocalMemory::ephemeral());
        let client: Arc<dyn ModelClient> = model;
        let mut registry = CommandRegistry::new();
        register_builtins(
            &mut registry,
            &BuiltinContext {
                safety: safety.clone(),
                memory: memory.clone(),
                agents: AgentManager::new(client.clone(), "fast", 100),
                client: client.clone(),
                ask_model: "smart".to_string(),
                ask_token_budget: 100,
                execute_local_commands: false,
            },
        );
        let services = AgentServices::new(config, client, Arc::new(registry), safety);
        AgentLoop::root(services, memory, None).await
    }

    fn continuous() -> PartialConfig {
        PartialConfig {
            continuous: Some(true),
            ..PartialConfig::default()
        }
    }

    #[tokio::test]
    async fn unknown_command_is_recorded_and_loop_continues() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "fly_to_moon", "args": {}}]}"#,
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "gave up"}}]}"#,
        ]));
        let mut agent = root_loop(model, continuous(), &tmp).await;
        let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

        assert_eq!(outcome.output, "gave up");
        let records: Vec<&str> = agent
            .session()
            .history()
            .iter()
            .filter(|r| r.kind == RecordKind::CommandResult)
            .map(|r| r.content.as_str())
            .collect();
        assert!(records[0].starts_with("Command fly_to_moon returned: Unknown command 'fly_to_moon'"));
        assert!(agent
            .session()
            .history()
            .iter()
            .any(|r| r.content == "THE fly_to_moon COMMAND FAILED, ABORTING PLAN."));
    }

    #[tokio::test]
    async fn first_failure_stops_the_plan_not_the_loop() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [
                {"name": "read_file", "args": {"filename": "missing.txt"}},
                {"name": "task_complete", "args": {"reason": "should not run"}}
            ]}"#,
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "second plan"}}]}"#,
        ]));
        let mut agent = root_loop(model, continuous(), &tmp).await;
        let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

        assert_eq!(outcome.output, "second plan");
        assert_eq!(outcome.turns, 2);
    }

    #[tokio::test]
    async fn memory_receives_one_write_per_command() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "do_nothing"}, {"name": "task_complete", "args": {"reason": "ok"}}]}"#,
        ]));
        let mut agent = root_loop(model, continuous(), &tmp).await;
        agent.run(&mut ScriptedConsole::default()).await.unwrap();

        let memory = agent.memory.get("Assistant Reply do_nothing task_complete");
        assert_eq!(memory.matches("Assistant Reply:").count(), 2);
        assert!(memory.contains("Result: Command do_nothing returned: No action performed."));
    }

    #[tokio::test]
    async fn self_feedback_rejection_becomes_feedback() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"thoughts": {"text": "write it"}, "commands": [{"name": "do_nothing"}]}"#,
            "The plan does nothing useful; write the file instead.",
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
        ]));
        let mut agent = root_loop(model.clone(), PartialConfig::default(), &tmp).await;
        let mut console = ScriptedConsole::new(["s", "y"]);
        let outcome = agent.run(&mut console).await.unwrap();

        assert_eq!(outcome.exit, LoopExit::Done);
        let calls = model.calls();
        assert!(calls[1].messages[0].content.contains("write it"));
        assert!(agent
            .session()
            .history()
            .iter()
            .any(|r| r.content == "Human feedback: The plan does nothing useful; write the file instead."));
        assert_eq!(agent.session().last_user_input(), Some("The plan does nothing useful; write the file instead."));
    }

    #[tokio::test]
    async fn malformed_count_and_blank_lines_reprompt() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
        ]));
        let mut agent = root_loop(model, PartialConfig::default(), &tmp).await;
        let mut console = ScriptedConsole::new(["", "y -x", "y"]);
        let outcome = agent.run(&mut console).await.unwrap();

        assert_eq!(outcome.output, "ok");
        assert_eq!(console.prompts, 3);
        assert!(console.shown.iter().any(|(label, _)| label == "WARNING:"));
    }

    #[tokio::test]
    async fn token_budget_exhaustion_ends_in_done() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "do_nothing"}]}"#,
            r#"{"commands": [{"name": "do_nothing"}]}"#,
        ]));
        let partial = PartialConfig {
            token_budget: Some(10),
            ..continuous()
        };
        let mut agent = root_loop(model.clone(), partial, &tmp).await;
        let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();

        assert_eq!(outcome.exit, LoopExit::Done);
        assert_eq!(outcome.reason, StopReason::BudgetExhausted);
        assert_eq!(model.calls().len(), 1);
    }

    #[tokio::test]
    async fn path_escape_fails_the_command() {
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "read_file", "args": {"filename": "../secret"}}]}"#,
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "ok"}}]}"#,
        ]));
        let mut agent = root_loop(model, continuous(), &tmp).await;
        agent.run(&mut ScriptedConsole::default()).await.unwrap();

        let record = agent
            .session()
            .history()
            .iter()
            .find(|r| r.kind == RecordKind::CommandResult)
            .unwrap();
        assert_eq!(record.role, Role::System);
        assert!(record.content.contains("Path outside workspace"));
    }

    #[tokio::test]
    async fn verification_failure_policy_controls_the_plan() {
        let plan = r#"{"commands": [
            {"name": "message_agent", "args": {"key": "0", "message": "hi"}},
            {"name": "task_complete", "args": {"reason": "kept going"}}
        ]}"#;

        // Halt: the failed verification stops the plan; the next plan finishes.
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "start_agent", "args": {"name": "a", "task": "t", "prompt": "p"}}]}"#,
            "Acknowledged",
            "first",
            plan,
            "hello there",
            "False",
            r#"{"commands": [{"name": "task_complete", "args": {"reason": "halted"}}]}"#,
        ]));
        let mut agent = root_loop(model, continuous(), &tmp).await;
        let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();
        assert_eq!(outcome.output, "halted");

        // Continue: the rest of the same plan runs.
        let tmp = TempDir::new().unwrap();
        let model = Arc::new(ScriptedModel::new([
            r#"{"commands": [{"name": "start_agent", "args": {"name": "a", "task": "t", "prompt": "p"}}]}"#,
            "Acknowledged",
            "first",
            plan,
            "hello there",
            "False",
        ]));
        let partial = PartialConfig {
            verification_policy: Some(VerificationPolicy::Continue),
            ..continuous()
        };
        let mut agent = root_loop(model, partial, &tmp).await;
        let outcome = agent.run(&mut ScriptedConsole::default()).await.unwrap();
        assert_eq!(outcome.output, "kept going");
    }
}
