//! Shared utilities used across provider client implementations.
//!
//! The helpers in this module are useful when implementing additional providers
//! that expose an OpenAI-compatible HTTP surface: a tuned [`reqwest`] client
//! shared process-wide, a plain chat-completion helper built on `openai-rust2`,
//! and a raw wire-level helper for native tool calling and JSON-constrained
//! responses.

use crate::lucia::client_wrapper::{Message, NativeToolCall, Role, TokenUsage, ToolDefinition};
use lazy_static::lazy_static;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::error::Error;
use std::time::Duration;
use tokio::sync::Mutex;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// The single client instance keeps TLS sessions and DNS lookups warm, which
    /// significantly reduces latency when many concurrent requests are issued to
    /// upstream providers, tool servers, and the hub.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
///
/// The returned reference can be cloned and reused by individual client wrappers.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Render a [`Role`] into its OpenAI wire name.
fn role_name(role: &Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool { .. } => "tool",
    }
}

/// Send a plain chat-completion request through `openai-rust2`, persist token
/// usage, and surface the assistant content.
///
/// This is the path taken when no tools and no response-format constraint are in
/// play.  Tool-result messages cannot be expressed in the SDK's message type, so
/// callers with tool traffic use [`send_wire`] instead.
pub async fn send_plain(
    api: &openai_rust::Client,
    model: &str,
    messages: &[Message],
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error + Send + Sync>> {
    let formatted: Vec<chat::Message> = messages
        .iter()
        .map(|msg| chat::Message {
            role: role_name(&msg.role).to_owned(),
            content: msg.content.to_string(),
        })
        .collect();

    let args = chat::ChatArguments::new(model, formatted);
    let response = api
        .create_chat(args, Some("/chat/completions".to_string()))
        .await;

    match response {
        Ok(response) => {
            *usage_slot.lock().await = Some(TokenUsage {
                input_tokens: response.usage.prompt_tokens as usize,
                output_tokens: response.usage.completion_tokens as usize,
                total_tokens: response.usage.total_tokens as usize,
            });
            Ok(Message::assistant(&response.choices[0].message.content))
        }
        Err(err) => {
            if log::log_enabled!(log::Level::Error) {
                log::error!("clients::common::send_plain: chat API error: {}", err);
            }
            Err(format!("chat API error: {}", err).into())
        }
    }
}

/// Extra knobs for [`send_wire`] requests.
#[derive(Debug, Clone, Default)]
pub struct WireOptions {
    /// Sampling temperature; omitted from the body when `None`.
    pub temperature: Option<f32>,
    /// When `true`, requests `response_format: {"type": "json_object"}`.
    pub json_response: bool,
    /// Extra request headers, e.g. `("api-key", ...)` for Azure endpoints.
    pub headers: Vec<(String, String)>,
    /// When `false` the standard `Authorization: Bearer` header is suppressed
    /// (Azure endpoints authenticate through `api-key` instead).
    pub bearer_auth: bool,
}

impl WireOptions {
    /// Options for a standard bearer-authenticated call.
    pub fn bearer() -> Self {
        Self {
            temperature: None,
            json_response: false,
            headers: Vec::new(),
            bearer_auth: true,
        }
    }
}

/// Call an OpenAI-compatible Chat Completions endpoint at the wire level.
///
/// Posts to `{url}` with the serialised message history, optional native tool
/// definitions, and optional response-format / temperature constraints.  The
/// response is parsed to extract the assistant content string and any tool calls
/// the model requested.  Token usage is persisted in `usage_slot`.
///
/// # Message serialisation
///
/// | [`Role`] variant | Wire representation |
/// |---|---|
/// | `System` | `{"role":"system","content":"..."}` |
/// | `User` | `{"role":"user","content":"..."}` |
/// | `Assistant` with tool_calls | `{"role":"assistant","content":null,"tool_calls":[...]}` |
/// | `Assistant` without tool_calls | `{"role":"assistant","content":"..."}` |
/// | `Tool { call_id }` | `{"role":"tool","tool_call_id":"<id>","content":"..."}` |
pub async fn send_wire(
    url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    tools: &[ToolDefinition],
    options: &WireOptions,
    http_client: &reqwest::Client,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<Message, Box<dyn Error + Send + Sync>> {
    let wire_messages: Vec<serde_json::Value> = messages
        .iter()
        .map(|msg| match &msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let tool_calls: Vec<serde_json::Value> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        serde_json::json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_else(|_| "{}".to_string())
                            }
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": serde_json::Value::Null,
                    "tool_calls": tool_calls
                })
            }
            Role::Tool { call_id } => serde_json::json!({
                "role": "tool",
                "tool_call_id": call_id,
                "content": msg.content.as_ref()
            }),
            role => serde_json::json!({
                "role": role_name(role),
                "content": msg.content.as_ref()
            }),
        })
        .collect();

    let mut body = serde_json::json!({
        "model": model,
        "messages": wire_messages,
    });

    if !tools.is_empty() {
        let wire_tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters_schema
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(wire_tools);
    }
    if let Some(temperature) = options.temperature {
        body["temperature"] = serde_json::json!(temperature);
    }
    if options.json_response {
        body["response_format"] = serde_json::json!({"type": "json_object"});
    }

    let mut request = http_client
        .post(url)
        .header("Content-Type", "application/json")
        .json(&body);
    if options.bearer_auth {
        request = request.header("Authorization", format!("Bearer {}", api_key));
    }
    for (name, value) in &options.headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let resp = request.send().await?;
    let status = resp.status();
    let text = resp.text().await?;

    if !status.is_success() {
        if log::log_enabled!(log::Level::Error) {
            log::error!("clients::common::send_wire: HTTP {} from {}: {}", status, url, text);
        }
        return Err(format!("chat endpoint returned HTTP {} — {}", status, text).into());
    }

    let parsed: serde_json::Value = serde_json::from_str(&text)?;

    if let Some(usage_obj) = parsed.get("usage") {
        let input = usage_obj
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        let output = usage_obj
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize;
        *usage_slot.lock().await = Some(TokenUsage {
            input_tokens: input,
            output_tokens: output,
            total_tokens: input + output,
        });
    }

    let choice_msg = parsed
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .ok_or_else(|| -> Box<dyn Error + Send + Sync> {
            "chat endpoint response carried no choices".into()
        })?;

    let content: std::sync::Arc<str> = choice_msg
        .get("content")
        .and_then(|c| c.as_str())
        .map(std::sync::Arc::from)
        .unwrap_or_else(|| std::sync::Arc::from(""));

    let tool_calls: Vec<NativeToolCall> = choice_msg
        .get("tool_calls")
        .and_then(|tc| tc.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|tc| {
                    let id = tc.get("id")?.as_str()?.to_string();
                    let func = tc.get("function")?;
                    let name = func.get("name")?.as_str()?.to_string();
                    let args_str = func.get("arguments")?.as_str().unwrap_or("{}");
                    let arguments: serde_json::Value = serde_json::from_str(args_str)
                        .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));
                    Some(NativeToolCall { id, name, arguments })
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(Message {
        role: Role::Assistant,
        content,
        tool_calls,
    })
}
