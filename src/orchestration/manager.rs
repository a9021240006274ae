//! Owned arena of keyed chat agents.
//!
//! A chat agent is a plain conversation with the fast model: no commands, no
//! loop, just a message history that grows with every exchange. Keys come
//! from a counter and are never handed out twice, even after deletion.
//!
//! The arena sits behind `Arc<Mutex<..>>` so the built-in command handlers
//! can share it. The lock is never held across a model call.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::types::ChatAgentInfo;
use crate::error::HandlerError;
use crate::llm::{ChatMessage, ModelClient};

struct ChatAgent {
    name: String,
    task: String,
    messages: Vec<ChatMessage>,
}

#[derive(Default)]
struct Arena {
    next_key: u32,
    agents: BTreeMap<u32, ChatAgent>,
}

#[derive(Clone)]
pub struct AgentManager {
    arena: Arc<Mutex<Arena>>,
    client: Arc<dyn ModelClient>,
    model: String,
    token_budget: usize,
}

impl AgentManager {
    pub fn new(client: Arc<dyn ModelClient>, model: impl Into<String>, token_budget: usize) -> Self {
        Self {
            arena: Arc::new(Mutex::new(Arena::default())),
            client,
            model: model.into(),
            token_budget,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Arena> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create an agent, have it acknowledge its identity, then send it
    /// `prompt`. Returns the new key and the reply to `prompt`.
    pub async fn create_agent(&self, name: &str, task: &str, prompt: &str) -> Result<(u32, String), HandlerError> {
        let mut messages = vec![ChatMessage::user(format!(
            "You are {name}.  Respond with: \"Acknowledged\"."
        ))];
        let ack = self.client.complete(&messages, self.token_budget, &self.model).await?;
        messages.push(ChatMessage::assistant(ack));

        let key = {
            let mut arena = self.lock();
            let key = arena.next_key;
            arena.next_key += 1;
            arena.agents.insert(
                key,
                ChatAgent {
                    name: name.to_string(),
                    task: task.to_string(),
                    messages,
                },
            );
            key
        };
        tracing::info!(key, name, "Chat agent created");

        let reply = self.message_agent(&key.to_string(), prompt).await?;
        Ok((key, reply))
    }

    /// Send `message` to the agent identified by key or, failing that, name.
    pub async fn message_agent(&self, key_or_name: &str, message: &str) -> Result<String, HandlerError> {
        let (key, mut messages) = {
            let arena = self.lock();
            let key = find_key(&arena, key_or_name)
                .ok_or_else(|| HandlerError::Failed(format!("Agent {key_or_name} does not exist.")))?;
            (key, arena.agents[&key].messages.clone())
        };

        messages.push(ChatMessage::user(message));
        let reply = self.client.complete(&messages, self.token_budget, &self.model).await?;
        messages.push(ChatMessage::assistant(reply.clone()));

        // The agent may have been deleted while we waited; then the reply is
        // still returned but not stored.
        if let Some(agent) = self.lock().agents.get_mut(&key) {
            agent.messages = messages;
        }
        Ok(reply)
    }

    pub fn list_agents(&self) -> Vec<ChatAgentInfo> {
        self.lock()
            .agents
            .iter()
            .map(|(key, agent)| ChatAgentInfo {
                key: *key,
                name: agent.name.clone(),
                task: agent.task.clone(),
            })
            .collect()
    }

    pub fn delete_agent(&self, key: u32) -> bool {
        self.lock().agents.remove(&key).is_some()
    }
}

fn find_key(arena: &Arena, key_or_name: &str) -> Option<u32> {
    let trimmed = key_or_name.trim();
    if let Ok(key) = trimmed.parse::<u32>() {
        if arena.agents.contains_key(&key) {
            return Some(key);
        }
    }
    arena
        .agents
        .iter()
        .find(|(_, agent)| agent.name.eq_ignore_ascii_case(trimmed))
        .map(|(key, _)| *key)
}
