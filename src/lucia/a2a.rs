//! Agent-to-agent (A2A) protocol: JSON-RPC 2.0 over HTTP.
//!
//! Satellite agents live in their own processes and are reached through
//! `message/send`; each exposes an agent card at
//! `/a2a/{agent-id}/.well-known/agent.json`.  This module carries the wire
//! types and the outbound [`A2aClient`] the dispatcher uses.  The inbound
//! surface lives in [`crate::a2a_server`] behind the `a2a-server` feature.

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lucia::agent::AgentCard;
use crate::lucia::clients::common::get_shared_http_client;

/// One content part of an A2A message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum A2aPart {
    Text { text: String },
}

/// An A2A protocol message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct A2aMessage {
    /// Always `"message"`.
    pub kind: String,
    /// `"user"` or `"agent"`.
    pub role: String,
    pub parts: Vec<A2aPart>,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
}

impl A2aMessage {
    /// Build a user message with one text part and a fresh message id.
    pub fn user_text(text: impl Into<String>, context_id: Option<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "user".to_string(),
            parts: vec![A2aPart::Text { text: text.into() }],
            message_id: Uuid::new_v4().to_string(),
            context_id,
        }
    }

    /// Build an agent reply correlated to `context_id`.
    pub fn agent_text(text: impl Into<String>, context_id: Option<String>) -> Self {
        Self {
            kind: "message".to_string(),
            role: "agent".to_string(),
            parts: vec![A2aPart::Text { text: text.into() }],
            message_id: Uuid::new_v4().to_string(),
            context_id,
        }
    }

    /// Concatenated text content of all text parts.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                A2aPart::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Errors from A2A calls, split so the dispatcher can classify retries.
#[derive(Debug, Clone)]
pub enum A2aError {
    /// Connection-level failure (reset, refused, timeout): transient.
    Transport(String),
    /// The peer answered with an HTTP 5xx: transient.
    ServerStatus(u16),
    /// The peer answered, but the payload made no sense: not transient.
    Protocol(String),
    /// JSON-RPC error object from the peer: not transient.
    Rpc { code: i64, message: String },
}

impl A2aError {
    /// Whether the dispatcher may retry this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, A2aError::Transport(_) | A2aError::ServerStatus(_))
    }
}

impl fmt::Display for A2aError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            A2aError::Transport(msg) => write!(f, "a2a transport error: {}", msg),
            A2aError::ServerStatus(status) => write!(f, "a2a peer returned HTTP {}", status),
            A2aError::Protocol(msg) => write!(f, "a2a protocol error: {}", msg),
            A2aError::Rpc { code, message } => write!(f, "a2a rpc error {}: {}", code, message),
        }
    }
}

impl Error for A2aError {}

/// Outbound JSON-RPC 2.0 client for one remote agent endpoint.
#[derive(Clone)]
pub struct A2aClient {
    url: String,
    request_timeout: Duration,
}

impl A2aClient {
    /// Client for the endpoint from the remote agent's card, e.g.
    /// `"http://satellite:8090/a2a/music-agent"`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn rpc(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, A2aError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });

        let resp = get_shared_http_client()
            .post(&self.url)
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| A2aError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_server_error() {
            return Err(A2aError::ServerStatus(status.as_u16()));
        }
        if !status.is_success() {
            return Err(A2aError::Protocol(format!("HTTP {}", status)));
        }

        let envelope: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| A2aError::Protocol(e.to_string()))?;

        if let Some(error) = envelope.get("error") {
            return Err(A2aError::Rpc {
                code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(-32000),
                message: error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        envelope
            .get("result")
            .cloned()
            .ok_or_else(|| A2aError::Protocol("response carried no result".to_string()))
    }

    /// `message/send`: deliver a user message and return the peer's reply text.
    pub async fn send_message(
        &self,
        text: &str,
        context_id: Option<String>,
    ) -> Result<String, A2aError> {
        let message = A2aMessage::user_text(text, context_id);
        let result = self
            .rpc("message/send", serde_json::json!({ "message": message }))
            .await?;

        let reply: A2aMessage = serde_json::from_value(result)
            .map_err(|e| A2aError::Protocol(format!("malformed reply message: {}", e)))?;
        Ok(reply.text())
    }

    /// `tasks/get`: fetch the state of a long-running task.
    pub async fn get_task(&self, task_id: &str) -> Result<serde_json::Value, A2aError> {
        self.rpc("tasks/get", serde_json::json!({ "id": task_id })).await
    }

    /// `tasks/cancel`: request cancellation of a long-running task.
    pub async fn cancel_task(&self, task_id: &str) -> Result<serde_json::Value, A2aError> {
        self.rpc("tasks/cancel", serde_json::json!({ "id": task_id })).await
    }

    /// Fetch the peer's agent card from its discovery endpoint.
    pub async fn fetch_card(&self) -> Result<AgentCard, A2aError> {
        let url = format!("{}/.well-known/agent.json", self.url.trim_end_matches('/'));
        let resp = get_shared_http_client()
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|e| A2aError::Transport(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(A2aError::Protocol(format!("HTTP {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| A2aError::Protocol(format!("malformed agent card: {}", e)))
    }
}
