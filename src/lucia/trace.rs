//! Trace capture for agent LLM calls and pipeline runs.
//!
//! Every chat client handed to an agent is wrapped in [`TracingChatClient`],
//! which records the outgoing messages, the response, any tool calls, and the
//! elapsed time of each round-trip without altering the semantic output.  The
//! records land in a [`TraceStore`] for dashboard inspection and export;
//! invocation spans are captured alongside them with stable tag names
//! (`agent.id`, `agent.local`, `agent.success`, `agent.duration_ms`) so an
//! external observability backend can lift them out unchanged.
//!
//! Trace writes are observability-only: failures to persist are logged and
//! swallowed, never surfaced to the caller.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::lucia::client_wrapper::{ChatClient, Message, TokenUsage, ToolDefinition};
use crate::lucia::store::{collections, DocumentStore};

/// One tool call observed inside a traced LLM round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracedToolCall {
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Captured record of one LLM round-trip or one whole pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    pub trace_id: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    /// Rendered outgoing messages, role-prefixed.
    pub prompt: String,
    pub response: String,
    #[serde(default)]
    pub tool_calls: Vec<TracedToolCall>,
    pub duration_ms: u64,
    pub success: bool,
    /// Optional label, e.g. `"pipeline"` for façade-level records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Span emitted around one agent invocation, with stable tag names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub tags: HashMap<String, serde_json::Value>,
}

/// Retains trace records for export and mirrors them into the document store.
pub struct TraceStore {
    records: RwLock<Vec<TraceRecord>>,
    spans: RwLock<Vec<SpanRecord>>,
    durable: Option<Arc<dyn DocumentStore>>,
    /// In-memory retention bound; oldest records are dropped past it.
    capacity: usize,
}

impl TraceStore {
    /// Purely in-memory store with the given retention bound.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            spans: RwLock::new(Vec::new()),
            durable: None,
            capacity,
        }
    }

    /// Mirror records into a durable document store (builder pattern).
    pub fn with_durable(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Record a trace.  Durable-write failures are logged and swallowed.
    pub async fn record(&self, record: TraceRecord) {
        if let Some(durable) = &self.durable {
            match serde_json::to_value(&record) {
                Ok(doc) => {
                    if let Err(e) = durable.put(collections::TRACES, &record.trace_id, doc).await {
                        log::warn!("trace: failed to persist record {}: {}", record.trace_id, e);
                    }
                }
                Err(e) => log::warn!("trace: failed to serialise record: {}", e),
            }
        }

        let mut records = self.records.write().await;
        records.push(record);
        let len = records.len();
        if len > self.capacity {
            records.drain(0..len - self.capacity);
        }
    }

    /// Record an invocation span.
    pub async fn record_span(&self, span: SpanRecord) {
        let mut spans = self.spans.write().await;
        spans.push(span);
        let len = spans.len();
        if len > self.capacity {
            spans.drain(0..len - self.capacity);
        }
    }

    /// Traces for one agent, newest last.
    pub async fn for_agent(&self, agent_id: &str) -> Vec<TraceRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Traces captured at or after `since`.
    pub async fn since(&self, since: DateTime<Utc>) -> Vec<TraceRecord> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect()
    }

    /// The most recent `limit` records.
    pub async fn recent(&self, limit: usize) -> Vec<TraceRecord> {
        let records = self.records.read().await;
        let start = records.len().saturating_sub(limit);
        records[start..].to_vec()
    }

    /// All recorded spans.
    pub async fn spans(&self) -> Vec<SpanRecord> {
        self.spans.read().await.clone()
    }
}

/// Render messages into a compact role-prefixed transcript for trace storage.
pub fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for msg in messages {
        let role = match &msg.role {
            crate::lucia::client_wrapper::Role::System => "system",
            crate::lucia::client_wrapper::Role::User => "user",
            crate::lucia::client_wrapper::Role::Assistant => "assistant",
            crate::lucia::client_wrapper::Role::Tool { .. } => "tool",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&msg.content);
        out.push('\n');
    }
    out
}

/// Decorator that records a [`TraceRecord`] around every chat round-trip.
pub struct TracingChatClient {
    inner: Arc<dyn ChatClient>,
    agent_id: String,
    trace_store: Arc<TraceStore>,
}

impl TracingChatClient {
    pub fn new(inner: Arc<dyn ChatClient>, agent_id: impl Into<String>, trace_store: Arc<TraceStore>) -> Self {
        Self {
            inner,
            agent_id: agent_id.into(),
            trace_store,
        }
    }

    async fn trace(
        &self,
        messages: &[Message],
        result: &Result<Message, Box<dyn Error + Send + Sync>>,
        elapsed_ms: u64,
    ) {
        let (response, success, tool_calls) = match result {
            Ok(message) => (
                message.content.to_string(),
                true,
                message
                    .tool_calls
                    .iter()
                    .map(|tc| TracedToolCall {
                        name: tc.name.clone(),
                        arguments: tc.arguments.clone(),
                    })
                    .collect(),
            ),
            Err(e) => (e.to_string(), false, Vec::new()),
        };

        self.trace_store
            .record(TraceRecord {
                trace_id: Uuid::new_v4().to_string(),
                agent_id: self.agent_id.clone(),
                timestamp: Utc::now(),
                prompt: render_transcript(messages),
                response,
                tool_calls,
                duration_ms: elapsed_ms,
                success,
                label: None,
            })
            .await;
    }
}

#[async_trait]
impl ChatClient for TracingChatClient {
    async fn send_message(
        &self,
        messages: &[Message],
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let started = Instant::now();
        let result = self.inner.send_message(messages, tools).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.trace(messages, &result, elapsed_ms).await;
        result
    }

    async fn send_json(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let started = Instant::now();
        let result = self.inner.send_json(messages, temperature).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.trace(messages, &result, elapsed_ms).await;
        result
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn get_last_usage(&self) -> Option<TokenUsage> {
        self.inner.get_last_usage().await
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        self.inner.usage_slot()
    }
}
