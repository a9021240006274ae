use serde::Deserialize;
use std::path::PathBuf;

/// The TOML file structure for autoloop.toml.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub limits: Option<LimitsConfig>,
    pub authorization: Option<AuthorizationConfig>,
    pub agent: Option<AgentSection>,
    pub commands: Option<CommandsConfig>,
    pub safety: Option<SafetyConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub smart_model: Option<String>,
    pub fast_model: Option<String>,
    pub workspace: Option<String>,
    /// When set, the Ollama server at this URL is health-checked before the run.
    pub ollama_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    pub smart_token_limit: Option<usize>,
    pub fast_token_limit: Option<usize>,
    pub reply_token_reserve: Option<usize>,
    pub output_safety_margin: Option<usize>,
    pub verify_token_limit: Option<usize>,
    /// 0 disables the ceiling.
    pub token_budget: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    /// 0 disables the turn limit.
    pub max_turns: Option<u64>,
    pub sub_agent_max_turns: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationConfig {
    pub continuous: Option<bool>,
    pub authorise_key: Option<String>,
    pub exit_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AgentSection {
    pub name: Option<String>,
    pub role: Option<String>,
    pub goals: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CommandsConfig {
    /// Commands the root agent may never dispatch.
    pub root_blocked: Option<Vec<String>>,
    /// Added on top of the fixed sub-agent block-list; cannot shrink it.
    pub sub_agent_blocked: Option<Vec<String>>,
    /// Commands whose results are judged by the model.
    pub verify: Option<Vec<String>>,
    pub on_verification_failure: Option<VerificationPolicy>,
    pub execute_local_commands: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct SafetyConfig {
    pub shell_timeout_secs: Option<u64>,
    /// If specified, fully replaces the default blocklist.
    pub blocked_patterns: Option<Vec<BlocklistEntry>>,
    pub security_log: Option<String>,
    pub restrict_to_workspace: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocklistEntry {
    pub pattern: String,
    pub reason: String,
}

/// What happens to the rest of a plan when a verified command is judged
/// unsuccessful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationPolicy {
    /// Stop executing the remaining commands of the plan.
    #[default]
    Halt,
    /// Record the failure and keep going with the next command.
    Continue,
}

/// Fully-resolved runtime configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub smart_model: String,
    pub fast_model: String,
    pub workspace: PathBuf,
    pub ollama_url: Option<String>,
    pub request_timeout_secs: u64,

    pub smart_token_limit: usize,
    pub fast_token_limit: usize,
    pub reply_token_reserve: usize,
    pub output_safety_margin: usize,
    pub verify_token_limit: usize,
    pub token_budget: Option<u64>,
    pub max_consecutive_failures: u32,
    pub max_turns: Option<u64>,
    pub sub_agent_max_turns: u64,

    pub continuous: bool,
    pub authorise_key: String,
    pub exit_key: String,

    pub agent_name: String,
    pub agent_role: String,
    pub agent_goals: Vec<String>,

    pub root_blocked_commands: Vec<String>,
    pub sub_agent_blocked_commands: Vec<String>,
    pub verified_commands: Vec<String>,
    pub verification_policy: VerificationPolicy,
    pub execute_local_commands: bool,

    pub shell_timeout_secs: u64,
    pub blocked_patterns: Vec<(String, String)>,
    pub security_log_path: PathBuf,
    pub restrict_to_workspace: bool,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub smart_model: Option<String>,
    pub fast_model: Option<String>,
    pub workspace: Option<PathBuf>,
    pub ollama_url: Option<String>,
    pub request_timeout_secs: Option<u64>,

    pub smart_token_limit: Option<usize>,
    pub fast_token_limit: Option<usize>,
    pub reply_token_reserve: Option<usize>,
    pub output_safety_margin: Option<usize>,
    pub verify_token_limit: Option<usize>,
    pub token_budget: Option<u64>,
    pub max_consecutive_failures: Option<u32>,
    pub max_turns: Option<u64>,
    pub sub_agent_max_turns: Option<u64>,

    pub continuous: Option<bool>,
    pub authorise_key: Option<String>,
    pub exit_key: Option<String>,

    pub agent_name: Option<String>,
    pub agent_role: Option<String>,
    pub agent_goals: Option<Vec<String>>,

    pub root_blocked_commands: Option<Vec<String>>,
    pub sub_agent_blocked_commands: Option<Vec<String>>,
    pub verified_commands: Option<Vec<String>>,
    pub verification_policy: Option<VerificationPolicy>,
    pub execute_local_commands: Option<bool>,

    pub shell_timeout_secs: Option<u64>,
    pub blocked_patterns: Option<Vec<(String, String)>>,
    pub security_log_path: Option<PathBuf>,
    pub restrict_to_workspace: Option<bool>,
}

impl ConfigFile {
    /// Flatten the sectioned file layout into a mergeable [`PartialConfig`].
    pub fn to_partial(self) -> PartialConfig {
        let mut partial = PartialConfig::default();

        if let Some(general) = self.general {
            partial.smart_model = general.smart_model;
            partial.fast_model = general.fast_model;
            partial.workspace = general.workspace.map(PathBuf::from);
            partial.ollama_url = general.ollama_url;
            partial.request_timeout_secs = general.request_timeout_secs;
        }

        if let Some(limits) = self.limits {
            partial.smart_token_limit = limits.smart_token_limit;
            partial.fast_token_limit = limits.fast_token_limit;
            partial.reply_token_reserve = limits.reply_token_reserve;
            partial.output_safety_margin = limits.output_safety_margin;
            partial.verify_token_limit = limits.verify_token_limit;
            partial.token_budget = limits.token_budget;
            partial.max_consecutive_failures = limits.max_consecutive_failures;
            partial.max_turns = limits.max_turns;
            partial.sub_agent_max_turns = limits.sub_agent_max_turns;
        }

        if let Some(auth) = self.authorization {
            partial.continuous = auth.continuous;
            partial.authorise_key = auth.authorise_key;
            partial.exit_key = auth.exit_key;
        }

        if let Some(agent) = self.agent {
            partial.agent_name = agent.name;
            partial.agent_role = agent.role;
            partial.agent_goals = agent.goals;
        }

        if let Some(commands) = self.commands {
            partial.root_blocked_commands = commands.root_blocked;
            partial.sub_agent_blocked_commands = commands.sub_agent_blocked;
            partial.verified_commands = commands.verify;
            partial.verification_policy = commands.on_verification_failure;
            partial.execute_local_commands = commands.execute_local_commands;
        }

        if let Some(safety) = self.safety {
            partial.shell_timeout_secs = safety.shell_timeout_secs;
            partial.blocked_patterns = safety
                .blocked_patterns
                .map(|entries| entries.into_iter().map(|e| (e.pattern, e.reason)).collect());
            partial.security_log_path = safety.security_log.map(PathBuf::from);
            partial.restrict_to_workspace = safety.restrict_to_workspace;
        }

        partial
    }
}
