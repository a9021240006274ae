//! System prompts for root agents and sub-agents.
//!
//! Both share the response format and command list; they differ in their
//! constraints. A root agent can also pick up operator notes from
//! `SYSTEM_PROMPT.md` in the workspace.

use std::path::Path;

/// Who an agent is and what it is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub name: String,
    pub role: String,
    pub goals: Vec<String>,
}

const RESPONSE_FORMAT: &str = r#"You should only respond in JSON format as described below
Response Format:
{
    "thoughts": {
        "text": "thought",
        "reasoning": "reasoning",
        "plan": "- short bulleted\n- list that conveys\n- long-term plan",
        "criticism": "constructive self-criticism",
        "speak": "thoughts summary to say to user"
    },
    "commands": [
        {
            "name": "command name",
            "args": {
                "arg name": "value"
            }
        }
    ]
}
Ensure the response can be parsed as JSON."#;

const SHARED_CONSTRAINTS: &[&str] = &[
    "Your short term memory is short, so immediately save important information to files.",
    "If you are unsure how you previously did something or want to recall past events, thinking about similar events will help you remember.",
    "Exclusively use the commands listed in double quotes e.g. \"command name\".",
    "Do not include commands whose argument values depend on the output of other commands in the commands list.",
    "Do not include //comments in the JSON response.",
];

const ROOT_CONSTRAINTS: &[&str] = &[
    "Several commands may be listed in one response; they run in order and stop at the first failure.",
    "Delegate self-contained research or writing tasks to sub-agents with \"start_sub_agent\".",
];

const SUB_AGENT_CONSTRAINTS: &[&str] = &[
    "No user assistance.",
    "Include all relevant information in the final complete response once the goal has been achieved.",
];

const PERFORMANCE: &[&str] = &[
    "Continuously review and analyze your actions to ensure you are performing to the best of your abilities.",
    "Constructively self-criticize your big-picture behavior constantly.",
    "Every command has a cost, so be smart and efficient. Aim to complete tasks in the least number of steps.",
];

/// Prompt for the agent the operator started.
pub fn build_root_prompt(profile: &AgentProfile, commands: &str, operator_notes: Option<&str>) -> String {
    let constraints: Vec<&str> = SHARED_CONSTRAINTS.iter().chain(ROOT_CONSTRAINTS).copied().collect();
    let mut prompt = render(profile, &constraints, commands);
    if let Some(notes) = operator_notes.map(str::trim).filter(|n| !n.is_empty()) {
        prompt.push_str("\n\nOperator notes:\n");
        prompt.push_str(notes);
    }
    prompt
}

/// Prompt for a spawned sub-agent.
pub fn build_sub_agent_prompt(profile: &AgentProfile, commands: &str) -> String {
    let constraints: Vec<&str> = SHARED_CONSTRAINTS.iter().chain(SUB_AGENT_CONSTRAINTS).copied().collect();
    render(profile, &constraints, commands)
}

/// Contents of `SYSTEM_PROMPT.md` in the workspace, if there is one.
pub async fn load_operator_notes(workspace: &Path) -> Option<String> {
    let path = workspace.join("SYSTEM_PROMPT.md");
    match tokio::fs::read_to_string(&path).await {
        Ok(notes) => Some(notes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::warn!(path = %path.display(), "Could not read operator notes: {e}");
            None
        }
    }
}

fn render(profile: &AgentProfile, constraints: &[&str], commands: &str) -> String {
    let goals = numbered(profile.goals.iter().map(String::as_str));
    format!(
        "You are {name}, {role}\n\
         Your decisions must always be made independently without seeking user assistance.\n\n\
         GOALS:\n\n{goals}\n\n\
         Constraints:\n{constraints}\n\n\
         Commands:\n{commands}\n\n\
         Performance Evaluation:\n{performance}\n\n\
         {RESPONSE_FORMAT}",
        name = profile.name,
        role = profile.role,
        constraints = numbered(constraints.iter().copied()),
        performance = numbered(PERFORMANCE.iter().copied()),
    )
}

fn numbered<'a>(items: impl Iterator<Item = &'a str>) -> String {
    items
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}
