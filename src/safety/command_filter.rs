use regex::RegexSet;

use super::defaults::default_blocklist;

/// Checks shell command lines against a set of blocked patterns.
pub struct CommandFilter {
    patterns: RegexSet,
    pattern_reasons: Vec<String>,
}

/// Information about a blocked command.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BlockedCommand {
    pub blocked: bool,
    pub reason: String,
    pub command: String,
}

impl BlockedCommand {
    /// Structured form handed back to the model in place of command output.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"blocked\":true,\"reason\":\"{}\"}}", self.reason.replace('"', "'"))
        })
    }
}

impl CommandFilter {
    /// Create a new filter from a list of (pattern, reason) tuples.
    /// The RegexSet is compiled once for efficient multi-pattern matching.
    pub fn new(patterns: &[(String, String)]) -> Result<Self, regex::Error> {
        let (regexes, reasons): (Vec<_>, Vec<_>) = patterns.iter().cloned().unzip();
        Ok(Self {
            patterns: RegexSet::new(&regexes)?,
            pattern_reasons: reasons,
        })
    }

    /// Filter built from [`default_blocklist`].
    pub fn from_defaults() -> Result<Self, regex::Error> {
        Self::new(&default_blocklist())
    }

    /// Check if a command is blocked. Returns Some(BlockedCommand) if blocked, None if allowed.
    pub fn check(&self, command: &str) -> Option<BlockedCommand> {
        let first = self.patterns.matches(command).into_iter().next()?;
        Some(BlockedCommand {
            blocked: true,
            reason: self.pattern_reasons[first].clone(),
            command: command.to_string(),
        })
    }
}
