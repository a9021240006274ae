use std::time::Duration;

use async_trait::async_trait;
use genai::chat::{ChatOptions, ChatRequest};
use genai::Client;

use super::{ChatMessage, ModelClient, Role};
use crate::error::{AgentError, ProviderError};

/// [`ModelClient`] backed by the `genai` multi-provider client.
///
/// Model names without a provider prefix go to a local Ollama server, so the
/// same binary works against hosted APIs and local models.
pub struct GenaiModelClient {
    client: Client,
    timeout_secs: u64,
}

impl GenaiModelClient {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            client: Client::default(),
            timeout_secs,
        }
    }
}

#[async_trait]
impl ModelClient for GenaiModelClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        token_budget: usize,
        model: &str,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest::new(messages.iter().map(to_genai).collect());
        let options = ChatOptions::default().with_max_tokens(token_budget.min(u32::MAX as usize) as u32);

        tracing::debug!(model, messages = messages.len(), token_budget, "Model request");

        let call = self.client.exec_chat(model, request, Some(&options));
        let response = tokio::time::timeout(Duration::from_secs(self.timeout_secs), call)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout_secs))?
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        match response.first_text() {
            Some(text) if !text.trim().is_empty() => Ok(text.to_string()),
            _ => Err(ProviderError::EmptyReply),
        }
    }
}

fn to_genai(message: &ChatMessage) -> genai::chat::ChatMessage {
    match message.role {
        Role::System => genai::chat::ChatMessage::system(message.content.as_str()),
        Role::User => genai::chat::ChatMessage::user(message.content.as_str()),
        Role::Assistant => genai::chat::ChatMessage::assistant(message.content.as_str()),
    }
}

// ---------------------------------------------------------------------------
// Ollama health check
// ---------------------------------------------------------------------------

/// Validate that an Ollama server at `base_url` is up and has `model` pulled.
///
/// Only meaningful for local models; the binary calls it when `ollama_url`
/// is configured.
pub async fn check_ollama_ready(base_url: &str, model: &str) -> Result<(), AgentError> {
    let http = reqwest::Client::new();
    let base_url = base_url.trim_end_matches('/');

    http.get(format!("{base_url}/"))
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .map_err(|e| AgentError::OllamaUnavailable {
            url: base_url.to_string(),
            message: format!("Is Ollama running? {e}"),
        })?;

    let resp = http
        .post(format!("{base_url}/api/show"))
        .json(&serde_json::json!({ "model": model }))
        .timeout(Duration::from_secs(10))
        .send()
        .await
        .map_err(|e| AgentError::ModelNotAvailable {
            model: model.to_string(),
            message: format!("Failed to query model info: {e}"),
        })?;

    if !resp.status().is_success() {
        return Err(AgentError::ModelNotAvailable {
            model: model.to_string(),
            message: format!(
                "Model not found (HTTP {}). Run `ollama pull {model}` to download it.",
                resp.status()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_map_onto_genai_roles() {
        let converted = to_genai(&ChatMessage::assistant("hi"));
        assert_eq!(converted.role, genai::chat::ChatRole::Assistant);

        let converted = to_genai(&ChatMessage::system("rules"));
        assert_eq!(converted.role, genai::chat::ChatRole::System);
    }

    #[tokio::test]
    async fn health_check_reports_unreachable_server() {
        // Port 9 (discard) is essentially never serving HTTP.
        let err = check_ollama_ready("http://127.0.0.1:9", "llama3.2")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::OllamaUnavailable { .. }));
    }
}
