use super::schema::{AppConfig, PartialConfig};
use crate::safety::defaults::default_blocklist;
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    /// For list values: REPLACE semantics (if self has Some, use it entirely).
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            smart_model: self.smart_model.or(fallback.smart_model),
            fast_model: self.fast_model.or(fallback.fast_model),
            workspace: self.workspace.or(fallback.workspace),
            ollama_url: self.ollama_url.or(fallback.ollama_url),
            request_timeout_secs: self.request_timeout_secs.or(fallback.request_timeout_secs),

            smart_token_limit: self.smart_token_limit.or(fallback.smart_token_limit),
            fast_token_limit: self.fast_token_limit.or(fallback.fast_token_limit),
            reply_token_reserve: self.reply_token_reserve.or(fallback.reply_token_reserve),
            output_safety_margin: self.output_safety_margin.or(fallback.output_safety_margin),
            verify_token_limit: self.verify_token_limit.or(fallback.verify_token_limit),
            token_budget: self.token_budget.or(fallback.token_budget),
            max_consecutive_failures: self
                .max_consecutive_failures
                .or(fallback.max_consecutive_failures),
            max_turns: self.max_turns.or(fallback.max_turns),
            sub_agent_max_turns: self.sub_agent_max_turns.or(fallback.sub_agent_max_turns),

            continuous: self.continuous.or(fallback.continuous),
            authorise_key: self.authorise_key.or(fallback.authorise_key),
            exit_key: self.exit_key.or(fallback.exit_key),

            agent_name: self.agent_name.or(fallback.agent_name),
            agent_role: self.agent_role.or(fallback.agent_role),
            agent_goals: self.agent_goals.or(fallback.agent_goals),

            root_blocked_commands: self.root_blocked_commands.or(fallback.root_blocked_commands),
            sub_agent_blocked_commands: self
                .sub_agent_blocked_commands
                .or(fallback.sub_agent_blocked_commands),
            verified_commands: self.verified_commands.or(fallback.verified_commands),
            verification_policy: self.verification_policy.or(fallback.verification_policy),
            execute_local_commands: self
                .execute_local_commands
                .or(fallback.execute_local_commands),

            shell_timeout_secs: self.shell_timeout_secs.or(fallback.shell_timeout_secs),
            blocked_patterns: self.blocked_patterns.or(fallback.blocked_patterns),
            security_log_path: self.security_log_path.or(fallback.security_log_path),
            restrict_to_workspace: self.restrict_to_workspace.or(fallback.restrict_to_workspace),
        }
    }

    /// Convert to AppConfig, filling any remaining gaps with defaults.
    pub fn finalize(self) -> AppConfig {
        let workspace = self
            .workspace
            .unwrap_or_else(|| PathBuf::from("./workspace"));
        let security_log_path = self
            .security_log_path
            .unwrap_or_else(|| workspace.join("security.log"));
        let smart_model = self.smart_model.unwrap_or_else(|| "llama3.2".to_string());
        let fast_model = self.fast_model.unwrap_or_else(|| smart_model.clone());

        AppConfig {
            smart_model,
            fast_model,
            workspace,
            ollama_url: self.ollama_url,
            request_timeout_secs: self.request_timeout_secs.unwrap_or(120),

            smart_token_limit: self.smart_token_limit.unwrap_or(8000),
            fast_token_limit: self.fast_token_limit.unwrap_or(4000),
            reply_token_reserve: self.reply_token_reserve.unwrap_or(1000),
            output_safety_margin: self.output_safety_margin.unwrap_or(600),
            verify_token_limit: self.verify_token_limit.unwrap_or(500),
            token_budget: self.token_budget.filter(|n| *n > 0),
            max_consecutive_failures: self.max_consecutive_failures.unwrap_or(3),
            max_turns: self.max_turns.filter(|n| *n > 0),
            sub_agent_max_turns: self.sub_agent_max_turns.unwrap_or(25),

            continuous: self.continuous.unwrap_or(false),
            authorise_key: self.authorise_key.unwrap_or_else(|| "y".to_string()),
            exit_key: self.exit_key.unwrap_or_else(|| "n".to_string()),

            agent_name: self.agent_name.unwrap_or_else(|| "Autoloop".to_string()),
            agent_role: self.agent_role.unwrap_or_else(|| {
                "an autonomous agent that works through its goals one command at a time".to_string()
            }),
            agent_goals: self.agent_goals.unwrap_or_default(),

            root_blocked_commands: self.root_blocked_commands.unwrap_or_default(),
            sub_agent_blocked_commands: self.sub_agent_blocked_commands.unwrap_or_default(),
            verified_commands: self
                .verified_commands
                .unwrap_or_else(|| vec!["message_agent".to_string()]),
            verification_policy: self.verification_policy.unwrap_or_default(),
            execute_local_commands: self.execute_local_commands.unwrap_or(false),

            shell_timeout_secs: self.shell_timeout_secs.unwrap_or(30),
            blocked_patterns: self.blocked_patterns.unwrap_or_else(default_blocklist),
            security_log_path,
            restrict_to_workspace: self.restrict_to_workspace.unwrap_or(true),
        }
    }
}
