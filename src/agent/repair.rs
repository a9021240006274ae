//! Coerces free-form model replies into a validated [`Plan`].
//!
//! Decoding is attempted on the raw reply first, then on progressively more
//! aggressive rewrites of it. Only the last resort, asking the fast model to
//! fix the text, is non-deterministic, and its answer goes back through the
//! same decoder before anything trusts it.

use std::sync::Arc;

use serde_json::{Map, Value};

use super::plan::{Command, Plan, Thoughts};
use crate::llm::{ChatMessage, ModelClient};

/// Why a reply could not be turned into a plan. Becomes a corrective system
/// message in the agent's history.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct RepairFailure {
    pub reason: String,
}

impl RepairFailure {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outcome of decoding one candidate text.
enum Decoded {
    /// Valid JSON with a usable command list.
    Plan(Plan),
    /// Valid JSON, but not shaped like a plan.
    Malformed(String),
    /// Not JSON at all.
    Undecodable(String),
}

struct ModelFixer {
    client: Arc<dyn ModelClient>,
    model: String,
    token_budget: usize,
}

/// Reply-to-plan decoder with an optional model-assisted fallback.
#[derive(Default)]
pub struct ResponseRepair {
    fixer: Option<ModelFixer>,
}

impl ResponseRepair {
    /// Repair using the deterministic strategies only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also ask `model` to fix replies that no deterministic strategy can
    /// decode.
    pub fn with_model_fixer(
        client: Arc<dyn ModelClient>,
        model: impl Into<String>,
        token_budget: usize,
    ) -> Self {
        Self {
            fixer: Some(ModelFixer {
                client,
                model: model.into(),
                token_budget,
            }),
        }
    }

    /// Turn `raw_reply` into a plan, or explain why that is impossible.
    pub async fn repair(&self, raw_reply: &str) -> Result<Plan, RepairFailure> {
        let first_failure = match decode_deterministic(raw_reply) {
            Decoded::Plan(plan) => return Ok(plan),
            // The text is already JSON, so a syntax fixer has nothing to add.
            Decoded::Malformed(reason) => return Err(RepairFailure::new(reason)),
            Decoded::Undecodable(reason) => reason,
        };

        let Some(fixer) = &self.fixer else {
            return Err(RepairFailure::new(first_failure));
        };

        tracing::debug!("Deterministic repair failed, asking model to fix JSON");
        let messages = [
            ChatMessage::system(
                "You repair malformed JSON. Reply with the corrected JSON object only, \
                 without prose or code fences.",
            ),
            ChatMessage::user(format!(
                "Make this valid JSON. It must be an object with a \"thoughts\" object and a \
                 non-empty \"commands\" list whose items each have a string \"name\" and an \
                 \"args\" object.\n\n{raw_reply}"
            )),
        ];
        let fixed = fixer
            .client
            .complete(&messages, fixer.token_budget, &fixer.model)
            .await
            .map_err(|e| RepairFailure::new(format!("{first_failure}; model repair failed: {e}")))?;

        match decode_deterministic(&fixed) {
            Decoded::Plan(plan) => Ok(plan),
            Decoded::Malformed(reason) | Decoded::Undecodable(reason) => Err(RepairFailure::new(
                format!("{first_failure}; model repair produced an unusable reply: {reason}"),
            )),
        }
    }
}

/// Strategies that need no model: the text as-is, the first balanced object
/// in it, then that object with common JSON mistakes normalized.
fn decode_deterministic(text: &str) -> Decoded {
    let mut outcome = decode_candidate(text);
    if matches!(outcome, Decoded::Plan(_)) {
        return outcome;
    }

    if let Some(block) = extract_object(text) {
        let extracted = decode_candidate(block);
        outcome = prefer(outcome, extracted);
        if matches!(outcome, Decoded::Plan(_)) {
            return outcome;
        }

        let normalized = decode_candidate(&normalize(block));
        outcome = prefer(outcome, normalized);
    }
    outcome
}

/// Keep the more informative of two outcomes: a plan beats a structural
/// complaint, which beats a syntax error.
fn prefer(current: Decoded, next: Decoded) -> Decoded {
    match (&current, &next) {
        (Decoded::Plan(_), _) => current,
        (_, Decoded::Plan(_)) => next,
        (Decoded::Undecodable(_), Decoded::Malformed(_)) => next,
        _ => current,
    }
}

fn decode_candidate(text: &str) -> Decoded {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value) => match plan_from_value(value) {
            Ok(plan) => Decoded::Plan(plan),
            Err(reason) => Decoded::Malformed(reason),
        },
        Err(e) => Decoded::Undecodable(format!("reply is not valid JSON: {e}")),
    }
}

fn plan_from_value(value: Value) -> Result<Plan, String> {
    let Value::Object(mut top) = value else {
        return Err("reply is not a JSON object".to_string());
    };

    let entries = match (top.remove("commands"), top.remove("command")) {
        (Some(Value::Array(items)), _) => items,
        (Some(_), _) => return Err("'commands' is not a list".to_string()),
        // Older single-command form.
        (None, Some(single @ Value::Object(_))) => vec![single],
        (None, _) => return Err("reply has no 'commands' list".to_string()),
    };
    if entries.is_empty() {
        return Err("'commands' list is empty".to_string());
    }

    let commands = entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| command_from_value(entry).ok_or_else(|| format!("command #{} has no string 'name'", i + 1)))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Plan {
        thoughts: Thoughts::from_value(top.get("thoughts")),
        commands,
    })
}

fn command_from_value(value: Value) -> Option<Command> {
    let Value::Object(mut entry) = value else {
        return None;
    };
    let name = match entry.remove("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_string(),
        _ => return None,
    };
    let args = match entry.remove("args") {
        Some(Value::Object(args)) => args,
        _ => Map::new(),
    };
    Some(Command::new(name, args))
}

// ---------------------------------------------------------------------------
// Textual strategies
// ---------------------------------------------------------------------------

/// The first balanced `{...}` block, skipping braces inside strings.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_smart_double(c: char) -> bool {
    matches!(c, '\u{201C}' | '\u{201D}' | '\u{201E}')
}

/// Turn typographic quotes used as delimiters into `"`, drop trailing
/// commas, and escape raw control characters that appear inside strings.
///
/// Typographic quotes inside a string opened by a plain `"` are content and
/// stay as they are.
fn normalize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    // The quote that opened the current string, if inside one.
    let mut open: Option<char> = None;
    let mut escaped = false;

    for (i, &ch) in chars.iter().enumerate() {
        if let Some(opener) = open {
            match ch {
                _ if escaped => {
                    escaped = false;
                    out.push(ch);
                }
                '\\' => {
                    escaped = true;
                    out.push(ch);
                }
                '"' => {
                    open = None;
                    out.push('"');
                }
                c if is_smart_double(c) && opener != '"' => {
                    open = None;
                    out.push('"');
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
                c => out.push(c),
            }
            continue;
        }

        match ch {
            '"' => {
                open = Some(ch);
                out.push('"');
            }
            c if is_smart_double(c) => {
                open = Some(c);
                out.push('"');
            }
            '\u{2018}' | '\u{2019}' => out.push('\''),
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(ch);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}
