//! Decoded form of one model turn.

use serde::Serialize;
use serde_json::{Map, Value};

/// The model's reasoning for a turn. Opaque to the loop apart from
/// self-feedback, which reviews it, and the console, which shows it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Thoughts {
    pub text: Option<String>,
    pub reasoning: Option<String>,
    pub plan: Option<String>,
    pub criticism: Option<String>,
    pub speak: Option<String>,
}

impl Thoughts {
    /// Read whatever thought fields are present. Lists (some models emit
    /// the plan as bullet items) are flattened to one item per line.
    pub fn from_value(value: Option<&Value>) -> Self {
        let Some(Value::Object(map)) = value else {
            return Self::default();
        };
        let field = |key: &str| map.get(key).and_then(flatten_text);
        Self {
            text: field("text"),
            reasoning: field("reasoning"),
            plan: field("plan"),
            criticism: field("criticism"),
            speak: field("speak"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Labelled lines for display, skipping absent fields.
    pub fn lines(&self) -> Vec<(&'static str, &str)> {
        [
            ("THOUGHTS:", &self.text),
            ("REASONING:", &self.reasoning),
            ("PLAN:", &self.plan),
            ("CRITICISM:", &self.criticism),
            ("SPEAK:", &self.speak),
        ]
        .into_iter()
        .filter_map(|(label, v)| v.as_deref().map(|v| (label, v)))
        .collect()
    }
}

fn flatten_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => format!("- {s}"),
                    other => format!("- {other}"),
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// One requested command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub name: String,
    pub args: Map<String, Value>,
}

impl Command {
    pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// String argument, if present.
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }
}

/// A validated turn: reasoning plus a non-empty, ordered list of commands.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub thoughts: Thoughts,
    pub commands: Vec<Command>,
}
