//! Provider-agnostic chat client primitives.
//!
//! Every model provider Lucia can talk to — an OpenAI-compatible deployment, Azure
//! OpenAI, Azure AI Inference, or a local Ollama daemon — is reached through the
//! [`ChatClient`] trait.  The supporting structs in this module describe chat
//! messages, native tool calls, and token accounting in a wire-format neutral way;
//! each client implementation translates them into its provider's HTTP surface.
//!
//! # Basic request/response
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use lucia::client_wrapper::{ChatClient, Message, Role};
//! use lucia::clients::openai_compat::OpenAiCompatClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let client = OpenAiCompatClient::new(
//!         "https://api.openai.com/v1",
//!         &std::env::var("OPEN_AI_SECRET")?,
//!         "gpt-4.1-nano",
//!     );
//!
//!     let response = client
//!         .send_message(&[Message::user("Who are you?")], None)
//!         .await?;
//!
//!     println!("Assistant: {}", response.content);
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A single tool call returned by the LLM in a native function-calling response.
///
/// Providers assign an opaque [`id`](NativeToolCall::id) to each call so that the
/// tool result can be correlated back in a follow-up `Role::Tool` message.
#[derive(Debug, Clone)]
pub struct NativeToolCall {
    /// Provider-assigned call ID, e.g. `"call_abc123"`.
    pub id: String,
    /// Tool name matching one of the [`ToolDefinition`]s sent with the request.
    pub name: String,
    /// Parsed JSON arguments supplied by the LLM for this call.
    pub arguments: serde_json::Value,
}

/// Provider-agnostic tool schema passed to the LLM along with a chat request.
///
/// Derived from [`ToolMetadata`](crate::tool_protocol::ToolMetadata) via
/// [`ToolMetadata::to_tool_definition`](crate::tool_protocol::ToolMetadata::to_tool_definition)
/// and serialised as an OpenAI-compatible `tools` array entry before transmission.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    /// Tool name as it will appear in the API `tools` array.
    pub name: String,
    /// Human-readable description surfaced to the LLM to aid tool selection.
    pub description: String,
    /// JSON Schema object describing the accepted parameters.
    pub parameters_schema: serde_json::Value,
}

/// Represents the possible roles for a message.
#[derive(Debug, Clone)]
pub enum Role {
    /// A system authored message that primes or constrains assistant behaviour.
    System,
    /// A user authored message (frequently a mirror of a human end-user request).
    User,
    /// An assistant authored message (model responses).
    Assistant,
    /// A tool-result message correlating with a prior assistant [`NativeToolCall`].
    ///
    /// Serialises as `{"role": "tool", "tool_call_id": "<call_id>", "content": "..."}`
    /// in the OpenAI wire format.
    Tool { call_id: String },
}

/// How many tokens were spent on prompt vs. completion?
#[derive(Clone, Debug)]
pub struct TokenUsage {
    /// Number of prompt/input tokens billed by the provider.
    pub input_tokens: usize,
    /// Number of generated/output tokens billed by the provider.
    pub output_tokens: usize,
    /// Convenience total equal to `input_tokens + output_tokens`.
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
///
/// The `tool_calls` field is populated by [`ChatClient::send_message`] when the
/// provider returns native function-calling results.  It defaults to an empty
/// `Vec` for all other message kinds.
#[derive(Clone)]
pub struct Message {
    /// The role associated with the message.
    pub role: Role,
    /// The message body.  Stored as `Arc<str>` so session histories can be cheaply
    /// cloned by the orchestrator and the tracing layer.
    pub content: Arc<str>,
    /// Native tool calls requested by the assistant.  Non-empty only on assistant
    /// messages returned by [`ChatClient::send_message`].
    pub tool_calls: Vec<NativeToolCall>,
}

impl Message {
    /// Build a system message.
    pub fn system(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::System,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build a user message.
    pub fn user(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::User,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build an assistant message without tool calls.
    pub fn assistant(content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Assistant,
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }

    /// Build a tool-result message for the given call id.
    pub fn tool_result(call_id: impl Into<String>, content: impl AsRef<str>) -> Self {
        Self {
            role: Role::Tool {
                call_id: call_id.into(),
            },
            content: Arc::from(content.as_ref()),
            tool_calls: Vec::new(),
        }
    }
}

/// Trait defining the interface to interact with the various model providers.
///
/// All implementations must be thread-safe (`Send + Sync`) so they can be shared
/// between async tasks.  Where a provider exposes token accounting information,
/// wrappers should capture it and make it visible via [`ChatClient::get_last_usage`].
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Send a full request/response style chat completion.
    ///
    /// The `messages` slice must include any system priming messages the caller
    /// wishes to send.  The `tools` parameter carries native [`ToolDefinition`]s
    /// forwarded to the provider's function-calling API; when `Some` and non-empty
    /// the returned [`Message`] may contain non-empty [`Message::tool_calls`].
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Send a chat completion constrained to a JSON object response.
    ///
    /// Used by the request router, which needs structured output at a fixed low
    /// temperature.  Providers without a native JSON response mode inherit this
    /// default, which falls through to the standard path; callers must therefore
    /// still parse defensively.
    async fn send_json(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        self.send_message(messages, None).await
    }

    /// Return the identifier used to select the upstream model (e.g. `"gpt-4.1"`).
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the most recent [`ChatClient::send_message`] call.
    async fn get_last_usage(&self) -> Option<TokenUsage> {
        if let Some(slot) = self.usage_slot() {
            slot.lock().await.clone()
        } else {
            None
        }
    }

    /// Expose a shared mutable slot where the implementation can persist token usage.
    ///
    /// By default wrappers report no usage data.  Providers that expose billing
    /// information should return `Some(&Mutex<Option<TokenUsage>>)` so that
    /// [`ChatClient::get_last_usage`] can surface the recorded values to callers.
    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        None
    }
}

/// Trait for providers that can embed text into a vector space.
///
/// Only the seam is defined here; agents receive an embedding generator when their
/// definition names an embedding provider, and individual tools decide what to do
/// with it.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Embed a single piece of text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, Box<dyn Error + Send + Sync>>;

    /// Identifier of the underlying embedding model.
    fn model_name(&self) -> &str;
}
