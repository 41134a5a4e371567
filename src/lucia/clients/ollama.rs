//! Ollama client wrapper built on the OpenAI-compatible transport.
//!
//! Ollama exposes an OpenAI-compatible surface under `/v1`, so this wrapper
//! delegates everything to [`OpenAiCompatClient`] rooted there.  Swapping a
//! provider record from a hosted deployment to a local Ollama daemon only
//! requires a different constructor.

use std::error::Error;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::lucia::client_wrapper::{ChatClient, Message, TokenUsage, ToolDefinition};
use crate::lucia::clients::openai_compat::OpenAiCompatClient;

/// Client wrapper for a local or remote Ollama daemon.
pub struct OllamaClient {
    /// Delegated client that handles the HTTP interactions.
    delegate_client: OpenAiCompatClient,
    /// Exposed model name (e.g. `"llama3.2"`).
    model: String,
}

impl OllamaClient {
    /// Create a client rooted at the daemon's base URL (e.g. `"http://127.0.0.1:11434"`).
    ///
    /// Ollama ignores the API key, but the OpenAI-compatible transport requires
    /// one on the wire; a placeholder is sent.
    pub fn new(endpoint: &str, model_name: &str) -> Self {
        let base = format!("{}/v1", endpoint.trim_end_matches('/'));
        OllamaClient {
            delegate_client: OpenAiCompatClient::new(&base, "ollama", model_name),
            model: model_name.to_string(),
        }
    }
}

#[async_trait]
impl ChatClient for OllamaClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.delegate_client.send_message(messages, tools).await
    }

    async fn send_json(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.delegate_client.send_json(messages, temperature).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        self.delegate_client.usage_slot()
    }
}
