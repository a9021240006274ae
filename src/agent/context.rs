//! Token estimation and context window assembly.

use chrono::{DateTime, Local};

use super::session::TurnRecord;
use crate::llm::ChatMessage;

/// Final user message of every request.
pub const TRIGGERING_PROMPT: &str =
    "Determine which next command to use, and respond using the format specified above:";

/// Fixed cost charged per message for role and framing.
const MESSAGE_OVERHEAD: usize = 4;

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

pub fn estimate_message_tokens(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| estimate_tokens(&m.content) + MESSAGE_OVERHEAD)
        .sum()
}

/// Everything needed to assemble one request to the smart model.
pub struct ContextWindow<'a> {
    pub system_prompt: &'a str,
    pub memory: &'a str,
    pub history: &'a [TurnRecord],
    pub token_limit: usize,
    pub reply_reserve: usize,
}

impl ContextWindow<'_> {
    /// System prompt, current time, relevant memories, then as much recent
    /// history as fits, in chronological order, and the triggering prompt.
    ///
    /// Memories are dropped before any history when space is short.
    pub fn build(&self, now: DateTime<Local>) -> Vec<ChatMessage> {
        let budget = self.token_limit.saturating_sub(self.reply_reserve);

        let mut head = vec![
            ChatMessage::system(self.system_prompt),
            ChatMessage::system(format!(
                "The current time and date is {}",
                now.format("%a %b %d %H:%M:%S %Y")
            )),
        ];
        let trigger = ChatMessage::user(TRIGGERING_PROMPT);

        if !self.memory.trim().is_empty() {
            let memory = ChatMessage::system(format!(
                "This reminds you of these events from your past:\n{}",
                self.memory
            ));
            let with_memory = estimate_message_tokens(&head)
                + estimate_message_tokens(std::slice::from_ref(&memory))
                + estimate_message_tokens(std::slice::from_ref(&trigger));
            if with_memory <= budget {
                head.push(memory);
            }
        }

        let mut used = estimate_message_tokens(&head)
            + estimate_message_tokens(std::slice::from_ref(&trigger));

        let mut recent = Vec::new();
        for record in self.history.iter().rev() {
            let cost = estimate_tokens(&record.content) + MESSAGE_OVERHEAD;
            if used + cost > budget {
                break;
            }
            used += cost;
            recent.push(ChatMessage {
                role: record.role,
                content: record.content.clone(),
            });
        }
        recent.reverse();

        head.extend(recent);
        head.push(trigger);
        head
    }
}
