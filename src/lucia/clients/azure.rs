//! Azure OpenAI and Azure AI Inference client wrappers.
//!
//! Azure exposes two HTTP dialects.  Azure OpenAI keeps the Chat Completions
//! body but moves the model into the URL path and authenticates with an
//! `api-key` header; Azure AI Inference uses the same body against a flat
//! `/chat/completions` route with a key credential.  Both wrappers ride on the
//! wire-level helper in [`crate::clients::common`] so the request body stays
//! identical to the generic client.

use std::error::Error;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::lucia::client_wrapper::{ChatClient, Message, TokenUsage, ToolDefinition};
use crate::lucia::clients::common::{get_shared_http_client, send_wire, WireOptions};

/// API version pinned for Azure OpenAI deployments.
const AZURE_OPENAI_API_VERSION: &str = "2024-06-01";

/// Client wrapper for an Azure OpenAI deployment.
///
/// `endpoint` is the resource root, e.g. `"https://my-res.openai.azure.com"`;
/// the deployment name doubles as the model identifier.  When the provider
/// record asks for default credentials the caller resolves a token from ambient
/// identity and passes it here as the key.
pub struct AzureOpenAiClient {
    endpoint: String,
    deployment: String,
    api_key: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl AzureOpenAiClient {
    /// Create a client for the given resource endpoint and deployment name.
    pub fn new(endpoint: &str, api_key: &str, deployment: &str) -> Self {
        AzureOpenAiClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment: deployment.to_string(),
            api_key: api_key.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, AZURE_OPENAI_API_VERSION
        )
    }

    fn wire_options(&self) -> WireOptions {
        WireOptions {
            temperature: None,
            json_response: false,
            headers: vec![("api-key".to_string(), self.api_key.clone())],
            bearer_auth: false,
        }
    }
}

#[async_trait]
impl ChatClient for AzureOpenAiClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        send_wire(
            &self.completions_url(),
            &self.api_key,
            &self.deployment,
            messages,
            tools.as_deref().unwrap_or(&[]),
            &self.wire_options(),
            get_shared_http_client(),
            &self.token_usage,
        )
        .await
    }

    async fn send_json(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut options = self.wire_options();
        options.temperature = Some(temperature);
        options.json_response = true;
        send_wire(
            &self.completions_url(),
            &self.api_key,
            &self.deployment,
            messages,
            &[],
            &options,
            get_shared_http_client(),
            &self.token_usage,
        )
        .await
    }

    fn model_name(&self) -> &str {
        &self.deployment
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}

/// Client wrapper for the Azure AI Inference (model catalog) API.
pub struct AzureInferenceClient {
    endpoint: String,
    model: String,
    api_key: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl AzureInferenceClient {
    /// Create a client for an Azure AI Inference endpoint and model.
    pub fn new(endpoint: &str, api_key: &str, model_name: &str) -> Self {
        AzureInferenceClient {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model_name.to_string(),
            api_key: api_key.to_string(),
            token_usage: Mutex::new(None),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[async_trait]
impl ChatClient for AzureInferenceClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
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
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
