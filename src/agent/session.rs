//! Per-agent mutable state: history, authorization mode, scope, budget.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::commands::CapabilityScope;
use crate::llm::Role;

/// Opening line of every running summary.
pub const INITIAL_SUMMARY: &str = "I was created.";

/// Lines kept in the running summary.
const SUMMARY_LINES: usize = 10;

/// Longest summary line, in characters.
const SUMMARY_LINE_CHARS: usize = 160;

/// What produced a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Raw model reply.
    Reply,
    /// Outcome of a command.
    CommandResult,
    /// Text typed by the operator, or the seeded context of a sub-agent.
    Feedback,
    /// Anything the loop itself says: corrections, plan status.
    Notice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRecord {
    pub role: Role,
    pub kind: RecordKind,
    pub content: String,
}

/// How commands get approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationMode {
    /// Ask on the console unless `pre_authorized` commands remain.
    Interactive { pre_authorized: u32 },
    /// Never ask.
    Continuous,
}

impl AuthorizationMode {
    /// Same kind of mode with no carried-over credit.
    pub fn for_child(self) -> Self {
        match self {
            AuthorizationMode::Interactive { .. } => AuthorizationMode::Interactive { pre_authorized: 0 },
            AuthorizationMode::Continuous => AuthorizationMode::Continuous,
        }
    }

    /// Whether the next command may skip the console. Spends one credit
    /// when it does so in interactive mode.
    pub fn consume_skip(&mut self) -> Skip {
        match self {
            AuthorizationMode::Continuous => Skip::Continuous,
            AuthorizationMode::Interactive { pre_authorized } if *pre_authorized > 0 => {
                *pre_authorized -= 1;
                Skip::Credit
            }
            AuthorizationMode::Interactive { .. } => Skip::No,
        }
    }

    /// Give back a credit spent by [`AuthorizationMode::consume_skip`].
    pub fn refund(&mut self) {
        if let AuthorizationMode::Interactive { pre_authorized } = self {
            *pre_authorized += 1;
        }
    }

    pub fn set_pre_authorized(&mut self, count: u32) {
        if let AuthorizationMode::Interactive { pre_authorized } = self {
            *pre_authorized = count;
        }
    }
}

/// Result of [`AuthorizationMode::consume_skip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    No,
    Continuous,
    Credit,
}

/// Token ceiling shared by a root agent and every sub-agent it spawns.
///
/// Spend only ever grows, so `remaining` only ever shrinks.
#[derive(Debug, Clone)]
pub struct TokenBudget {
    ceiling: Option<u64>,
    spent: Arc<AtomicU64>,
}

impl TokenBudget {
    pub fn new(ceiling: Option<u64>) -> Self {
        Self {
            ceiling,
            spent: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn charge(&self, tokens: usize) {
        self.spent.fetch_add(tokens as u64, Ordering::Relaxed);
    }

    pub fn spent(&self) -> u64 {
        self.spent.load(Ordering::Relaxed)
    }

    pub fn remaining(&self) -> Option<u64> {
        self.ceiling.map(|c| c.saturating_sub(self.spent()))
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == Some(0)
    }
}

/// Mutable state of one agent.
pub struct AgentSession {
    history: Vec<TurnRecord>,
    pub authorization: AuthorizationMode,
    pub scope: CapabilityScope,
    pub budget: TokenBudget,
    summary: VecDeque<String>,
    last_user_input: Option<String>,
}

impl AgentSession {
    pub fn new(authorization: AuthorizationMode, scope: CapabilityScope, budget: TokenBudget) -> Self {
        Self {
            history: Vec::new(),
            authorization,
            scope,
            budget,
            summary: VecDeque::from([INITIAL_SUMMARY.to_string()]),
            last_user_input: None,
        }
    }

    pub fn history(&self) -> &[TurnRecord] {
        &self.history
    }

    pub fn push(&mut self, role: Role, kind: RecordKind, content: impl Into<String>) {
        self.history.push(TurnRecord {
            role,
            kind,
            content: content.into(),
        });
    }

    pub fn push_reply(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, RecordKind::Reply, content);
    }

    pub fn push_notice(&mut self, content: impl Into<String>) {
        self.push(Role::System, RecordKind::Notice, content);
    }

    /// The running summary, oldest line first.
    pub fn summary(&self) -> String {
        self.summary.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    /// Add a line to the running summary, dropping the oldest beyond the cap.
    pub fn note(&mut self, line: &str) {
        let line = line.lines().next().unwrap_or_default();
        let line: String = line.chars().take(SUMMARY_LINE_CHARS).collect();
        self.summary.push_back(line);
        while self.summary.len() > SUMMARY_LINES {
            self.summary.pop_front();
        }
    }

    pub fn last_user_input(&self) -> Option<&str> {
        self.last_user_input.as_deref()
    }

    pub fn set_last_user_input(&mut self, input: impl Into<String>) {
        self.last_user_input = Some(input.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_authorization_counts_down_then_asks() {
        let mut mode = AuthorizationMode::Interactive { pre_authorized: 0 };
        mode.set_pre_authorized(2);
        assert_eq!(mode.consume_skip(), Skip::Credit);
        assert_eq!(mode.consume_skip(), Skip::Credit);
        assert_eq!(mode.consume_skip(), Skip::No);

        mode.refund();
        assert_eq!(mode, AuthorizationMode::Interactive { pre_authorized: 1 });
    }

    #[test]
    fn continuous_mode_never_asks_and_child_inherits_kind() {
        let mut mode = AuthorizationMode::Continuous;
        assert_eq!(mode.consume_skip(), Skip::Continuous);
        mode.set_pre_authorized(5);
        assert_eq!(mode, AuthorizationMode::Continuous);

        let parent = AuthorizationMode::Interactive { pre_authorized: 7 };
        assert_eq!(parent.for_child(), AuthorizationMode::Interactive { pre_authorized: 0 });
    }

    #[test]
    fn budget_is_shared_between_clones() {
        let budget = TokenBudget::new(Some(100));
        let child = budget.clone();
        child.charge(60);
        budget.charge(50);
        assert_eq!(budget.spent(), 110);
        assert_eq!(child.remaining(), Some(0));
        assert!(budget.is_exhausted());
        assert!(!TokenBudget::unlimited().is_exhausted());
    }

    #[test]
    fn summary_starts_created_and_stays_bounded() {
        let mut session = AgentSession::new(
            AuthorizationMode::Continuous,
            CapabilityScope::from_names(Vec::<String>::new()),
            TokenBudget::unlimited(),
        );
        assert_eq!(session.summary(), INITIAL_SUMMARY);

        for i in 0..25 {
            session.note(&format!("step {i}\nignored second line"));
        }
        let summary = session.summary();
        assert_eq!(summary.lines().count(), SUMMARY_LINES);
        assert!(summary.ends_with("step 24"));
        assert!(!summary.contains(INITIAL_SUMMARY));
    }
}
