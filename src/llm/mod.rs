//! Model-call collaborator.
//!
//! The loop only ever sees [`ModelClient`]: an opaque call that takes a list
//! of role-tagged messages plus a reply token budget and returns text.
//! [`GenaiModelClient`] is the production implementation; [`ScriptedModel`]
//! replays canned replies for tests.

pub mod genai_client;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

pub use genai_client::GenaiModelClient;
pub use scripted::ScriptedModel;

/// Message role, as understood by chat-completion APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Language model interface.
///
/// `token_budget` caps the length of the reply. Implementations must be safe
/// to share between a parent loop and the sub-agents it spawns.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        token_budget: usize,
        model: &str,
    ) -> Result<String, ProviderError>;
}
