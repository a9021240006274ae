//! Console input handling for command authorization.

use super::plan::Thoughts;
use crate::llm::ChatMessage;

/// Key that asks the model to review its own plan.
pub const SELF_FEEDBACK_KEY: &str = "s";

/// One line typed at the authorization prompt, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationInput {
    Approve,
    /// Approve this command and skip the prompt for the next `n`.
    ApproveMany(u32),
    SelfFeedback,
    Exit,
    /// Blank line; ask again.
    Empty,
    /// Looked like `y -N` but `N` was not a number; ask again.
    Malformed(String),
    /// Anything else is feedback for the model.
    Feedback(String),
}

pub fn parse_input(line: &str, authorise_key: &str, exit_key: &str) -> AuthorizationInput {
    let trimmed = line.trim();
    let lower = trimmed.to_lowercase();
    let authorise_key = authorise_key.to_lowercase();

    if lower.is_empty() {
        return AuthorizationInput::Empty;
    }
    if lower == authorise_key {
        return AuthorizationInput::Approve;
    }
    if let Some(count) = lower.strip_prefix(&format!("{authorise_key} -")) {
        return match count.trim().parse::<u32>() {
            Ok(n) => AuthorizationInput::ApproveMany(n),
            Err(_) => AuthorizationInput::Malformed(format!(
                "Invalid input format. Please enter '{authorise_key} -N' where N is the number of \
                 continuous tasks."
            )),
        };
    }
    if lower == SELF_FEEDBACK_KEY {
        return AuthorizationInput::SelfFeedback;
    }
    if lower == exit_key.to_lowercase() {
        return AuthorizationInput::Exit;
    }
    AuthorizationInput::Feedback(trimmed.to_string())
}

/// The prompt line shown before reading input.
pub fn prompt_text(authorise_key: &str, exit_key: &str, agent_name: &str) -> String {
    format!(
        "Enter '{authorise_key}' to authorise command, '{authorise_key} -N' to run N continuous \
         commands, '{SELF_FEEDBACK_KEY}' to run self-feedback commands, '{exit_key}' to exit \
         program, or enter feedback for {agent_name}...\nInput: "
    )
}

/// Request for the model to critique its own reasoning.
pub fn self_feedback_prompt(role: &str, thoughts: &Thoughts) -> Vec<ChatMessage> {
    let review: String = [&thoughts.text, &thoughts.reasoning, &thoughts.plan, &thoughts.criticism]
        .into_iter()
        .flatten()
        .map(|part| format!("{part}\n"))
        .collect();
    vec![ChatMessage::user(format!(
        "Below is a message from an AI agent with the role of {role}. Please review the provided \
         Thought, Reasoning, Plan, and Criticism. If these elements accurately contribute to the \
         successful execution of the assumed role, respond with the letter 'Y' followed by a \
         space, and then explain why it is effective. If the provided information is not \
         suitable for achieving the role's objectives, please provide one or more sentences \
         addressing the issue and suggesting a resolution.\n\n{review}"
    ))]
}

/// Whether a self-feedback answer approves the plan.
pub fn feedback_approves(answer: &str, authorise_key: &str) -> bool {
    answer
        .trim_start()
        .to_lowercase()
        .starts_with(&authorise_key.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> AuthorizationInput {
        parse_input(line, "y", "n")
    }

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(parse("y"), AuthorizationInput::Approve);
        assert_eq!(parse(" Y \n"), AuthorizationInput::Approve);
        assert_eq!(parse("N"), AuthorizationInput::Exit);
        assert_eq!(parse("s"), AuthorizationInput::SelfFeedback);
        assert_eq!(parse("   "), AuthorizationInput::Empty);
    }

    #[test]
    fn approve_many_parses_count() {
        assert_eq!(parse("y -3"), AuthorizationInput::ApproveMany(3));
        assert_eq!(parse("y - 10"), AuthorizationInput::ApproveMany(10));
        assert!(matches!(parse("y -x"), AuthorizationInput::Malformed(_)));
    }

    #[test]
    fn other_text_is_feedback_verbatim() {
        assert_eq!(
            parse("Use the Python docs instead"),
            AuthorizationInput::Feedback("Use the Python docs instead".to_string())
        );
        assert_eq!(parse("yes"), AuthorizationInput::Feedback("yes".to_string()));
    }

    #[test]
    fn self_feedback_approval_uses_leading_key() {
        assert!(feedback_approves("Y because the plan is sound", "y"));
        assert!(!feedback_approves("The plan skips a step", "y"));
    }

    #[test]
    fn self_feedback_prompt_includes_role_and_thoughts() {
        let thoughts = Thoughts {
            text: Some("Look up recipes".to_string()),
            criticism: Some("Might be slow".to_string()),
            ..Thoughts::default()
        };
        let messages = self_feedback_prompt("a chef", &thoughts);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].content.contains("role of a chef"));
        assert!(messages[0].content.ends_with("Look up recipes\nMight be slow\n"));
    }
}
