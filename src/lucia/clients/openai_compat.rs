//! Generic client for OpenAI-compatible Chat Completions deployments.
//!
//! This is the workhorse behind most model-provider records: OpenAI itself,
//! LM Studio, vLLM, LiteLLM proxies, and anything else speaking the
//! `/chat/completions` dialect.  Plain requests ride on the `openai-rust2` SDK;
//! requests that carry native tool definitions or a JSON response constraint go
//! through the wire-level helper so the full request body stays under our
//! control.
//!
//! # Example
//!
//! ```rust,no_run
//! use lucia::client_wrapper::{ChatClient, Message};
//! use lucia::clients::openai_compat::OpenAiCompatClient;
//!
//! # async {
//! let client = OpenAiCompatClient::new("http://localhost:1234/v1", "key", "qwen2.5");
//! let reply = client.send_message(&[Message::user("hi")], None).await.unwrap();
//! # };
//! ```

use std::error::Error;

use async_trait::async_trait;
use openai_rust2 as openai_rust;
use tokio::sync::Mutex;

use crate::lucia::client_wrapper::{ChatClient, Message, TokenUsage, ToolDefinition};
use crate::lucia::clients::common::{get_shared_http_client, send_plain, send_wire, WireOptions};

/// Client wrapper for any OpenAI-compatible Chat Completions endpoint.
///
/// The wrapper maintains the selected model identifier plus an internal
/// [`TokenUsage`] slot so callers can inspect how many tokens each request
/// consumed.  It reuses the shared HTTP client configured in
/// [`crate::clients::common`].
pub struct OpenAiCompatClient {
    /// SDK client used for the plain chat path.
    client: openai_rust::Client,
    /// Model name injected into each request.
    model: String,
    /// Storage for the token usage returned by the most recent request.
    token_usage: Mutex<Option<TokenUsage>>,
    /// API key, re-used by the wire-level tool path.
    api_key: String,
    /// Base URL without a trailing slash (e.g. `"https://api.openai.com/v1"`).
    base_url: String,
}

impl OpenAiCompatClient {
    /// Construct a client targeting an OpenAI-compatible base URL.
    ///
    /// `base_url` should not have a trailing slash (e.g. `"https://api.openai.com/v1"`).
    pub fn new(base_url: &str, api_key: &str, model_name: &str) -> Self {
        let base_url_normalized = base_url.trim_end_matches('/');
        OpenAiCompatClient {
            client: openai_rust::Client::new_with_client_and_base_url(
                api_key,
                get_shared_http_client().clone(),
                &format!("{}/", base_url_normalized),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
            api_key: api_key.to_string(),
            base_url: base_url_normalized.to_string(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl ChatClient for OpenAiCompatClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let has_tool_traffic = tools.as_ref().map(|t| !t.is_empty()).unwrap_or(false)
            || messages.iter().any(|m| !m.tool_calls.is_empty());

        if has_tool_traffic {
            // Tool definitions and tool-result messages need the full wire body.
            send_wire(
                &self.completions_url(),
                &self.api_key,
                &self.model,
                messages,
                tools.as_deref().unwrap_or(&[]),
                &WireOptions::bearer(),
                get_shared_http_client(),
                &self.token_usage,
            )
            .await
        } else {
            send_plain(&self.client, &self.model, messages, &self.token_usage).await
        }
    }

    async fn send_json(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut options = WireOptions::bearer();
        options.temperature = Some(temperature);
        options.json_response = true;
        send_wire(
            &self.completions_url(),
            &self.api_key,
            &self.model,
            messages,
            &[],
            &options,
            get_shared_http_client(),
            &self.token_usage,
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
