use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::{ChatMessage, ModelClient};
use crate::error::ProviderError;

/// A request observed by [`ScriptedModel`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub token_budget: usize,
    pub messages: Vec<ChatMessage>,
}

/// Model client that replays a fixed script of replies in order.
///
/// Every request is recorded so tests can inspect exactly what a loop sent.
/// An exhausted script answers with a provider error.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let model = Self::default();
        for reply in replies {
            model.push_reply(reply);
        }
        model
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Ok(reply.into()));
    }

    pub fn push_error(&self, error: ProviderError) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Err(error));
    }

    /// Snapshot of every request made so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        token_budget: usize,
        model: &str,
    ) -> Result<String, ProviderError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                model: model.to_string(),
                token_budget,
                messages: messages.to_vec(),
            });

        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::Request("script exhausted".to_string())))
    }
}
