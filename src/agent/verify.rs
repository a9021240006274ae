//! Decides whether a command actually succeeded.
//!
//! Most commands are judged by a cheap heuristic. The configured few whose
//! output is free text from another model (by default `message_agent`) are
//! judged by asking the fast model.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::commands::{ExecutionResult, UNKNOWN_COMMAND_MARKER};
use crate::llm::{ChatMessage, ModelClient};

pub struct Verifier {
    client: Arc<dyn ModelClient>,
    model: String,
    token_budget: usize,
    verified: HashSet<String>,
}

impl Verifier {
    pub fn new<I, S>(client: Arc<dyn ModelClient>, model: impl Into<String>, token_budget: usize, verified: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client,
            model: model.into(),
            token_budget,
            verified: verified.into_iter().map(Into::into).collect(),
        }
    }

    pub fn needs_verification(&self, name: &str) -> bool {
        self.verified.contains(name)
    }

    /// Final success verdict for a dispatched command.
    pub async fn judge(&self, name: &str, args: &Map<String, Value>, result: &ExecutionResult) -> bool {
        if !result.succeeded {
            return false;
        }
        if self.needs_verification(name) {
            self.verify(name, args, &result.output).await
        } else {
            heuristic(&result.output)
        }
    }

    /// Ask the fast model whether `result_text` indicates success. Any
    /// provider failure is a "no".
    pub async fn verify(&self, command: &str, args: &Map<String, Value>, result_text: &str) -> bool {
        let messages = verification_prompt(command, args, result_text);
        match self.client.complete(&messages, self.token_budget, &self.model).await {
            Ok(answer) => {
                let verdict = is_affirmative(&answer);
                tracing::debug!(command, verdict, "Model verification");
                verdict
            }
            Err(e) => {
                tracing::warn!(command, "Verification call failed: {e}");
                false
            }
        }
    }
}

/// Success unless the output carries the unknown-command marker.
pub fn heuristic(result_text: &str) -> bool {
    !result_text.contains(UNKNOWN_COMMAND_MARKER)
}

/// The answer's first word is `true` or `yes`, any case.
fn is_affirmative(answer: &str) -> bool {
    answer
        .split(|c: char| !c.is_alphanumeric())
        .find(|word| !word.is_empty())
        .is_some_and(|word| word.eq_ignore_ascii_case("true") || word.eq_ignore_ascii_case("yes"))
}

/// The verification request. Depends only on its inputs.
pub fn verification_prompt(command: &str, args: &Map<String, Value>, result_text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You judge whether a command succeeded. Answer with True if the command response \
             indicates success, and False otherwise. Answer with the single word only.",
        ),
        ChatMessage::user(format!(
            "Command: {command}\nArguments: {}\nResponse:\n{result_text}",
            Value::Object(args.clone())
        )),
    ]
}
