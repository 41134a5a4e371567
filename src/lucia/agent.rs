//! Agents: public cards and the local invokable.
//!
//! An [`AgentCard`] is the public metadata the router and the A2A surface see —
//! identity, description, declared skills with example utterances, capability
//! flags, and modalities.  A [`LocalAgent`] is the in-process invokable the
//! builder composes out of a definition: a traced chat client, a fixed system
//! instruction, and the resolved tools the agent may call.
//!
//! # Tool loop
//!
//! `LocalAgent::invoke` drives native function calling: the chat client is
//! called with the agent's tool definitions; when the model requests tool
//! calls, each one is routed to its tool server, the results are appended as
//! tool messages, and the model is called again.  The loop is bounded so a
//! misbehaving model cannot spin forever; tool failures are folded into tool
//! results rather than aborting the invocation.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lucia::client_wrapper::{ChatClient, Message, ToolDefinition};
use crate::lucia::tool_protocol::ToolMetadata;
use crate::lucia::tool_server::ToolServerRegistry;

/// Upper bound on model→tool→model iterations per invocation.
const MAX_TOOL_ITERATIONS: usize = 8;

/// One skill declared on an agent card.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSkill {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Example utterances; the router samples these into its catalog.
    #[serde(default)]
    pub examples: Vec<String>,
}

/// Capability flags advertised on an agent card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub state_transition_history: bool,
    #[serde(default)]
    pub push_notifications: bool,
}

/// Public-facing description of an agent.
///
/// `name` is the stable identity; `description` must be non-empty because the
/// router feeds it to the routing model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCard {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub version: String,
    /// Endpoint URL; set for remote agents, empty for in-process ones.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub skills: Vec<AgentSkill>,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
    #[serde(default = "default_modes")]
    pub default_input_modes: Vec<String>,
    #[serde(default = "default_modes")]
    pub default_output_modes: Vec<String>,
}

fn default_modes() -> Vec<String> {
    vec!["text".to_string()]
}

impl AgentCard {
    /// Build a minimal card; description must be non-empty.
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            url: String::new(),
            skills: Vec::new(),
            capabilities: AgentCapabilities::default(),
            default_input_modes: default_modes(),
            default_output_modes: default_modes(),
        }
    }

    pub fn with_skill(mut self, skill: AgentSkill) -> Self {
        self.skills.push(skill);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// One tool call made during an invocation, kept for the response trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool: String,
    pub server_id: String,
    pub arguments: serde_json::Value,
    pub success: bool,
}

/// Result of dispatching one agent.
#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub agent_id: String,
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentResponse {
    pub fn failure(agent_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            agent_id: agent_id.into(),
            content: String::new(),
            success: false,
            error: Some(error.into()),
            duration_ms,
            tool_calls: Vec::new(),
        }
    }
}

/// Content and tool trace produced by one [`LocalAgent::invoke`] run.
#[derive(Debug, Clone)]
pub struct InvocationOutput {
    pub content: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// A tool reference resolved against a connected server.
#[derive(Clone)]
pub struct ResolvedTool {
    pub server_id: String,
    pub metadata: ToolMetadata,
}

/// Errors raised by a local agent invocation.
#[derive(Debug, Clone)]
pub enum AgentError {
    /// The model kept requesting tools past the iteration bound.
    ToolLoopExceeded(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::ToolLoopExceeded(agent) => {
                write!(f, "agent {} exceeded the tool iteration bound", agent)
            }
        }
    }
}

impl Error for AgentError {}

/// An in-process invokable agent.
pub struct LocalAgent {
    /// Stable identifier; equals the definition id and the card name.
    pub id: String,
    pub display_name: String,
    pub description: String,
    /// System instruction prepended to every invocation.
    instructions: String,
    chat: Arc<dyn ChatClient>,
    tools: Vec<ResolvedTool>,
    tool_servers: Arc<ToolServerRegistry>,
}

impl LocalAgent {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        description: impl Into<String>,
        instructions: impl Into<String>,
        chat: Arc<dyn ChatClient>,
        tools: Vec<ResolvedTool>,
        tool_servers: Arc<ToolServerRegistry>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            description: description.into(),
            instructions: instructions.into(),
            chat,
            tools,
            tool_servers,
        }
    }

    /// The model identifier this agent runs on.
    pub fn model_name(&self) -> &str {
        self.chat.model_name()
    }

    /// Names of the tools this agent may call.
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.metadata.name.clone()).collect()
    }

    fn tool_definitions(&self) -> Option<Vec<ToolDefinition>> {
        if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.iter().map(|t| t.metadata.to_tool_definition()).collect())
        }
    }

    fn find_tool(&self, name: &str) -> Option<&ResolvedTool> {
        self.tools.iter().find(|t| t.metadata.name == name)
    }

    /// Run one invocation: prompt plus optional prior turns, tool loop included.
    pub async fn invoke(
        &self,
        prompt: &str,
        history: &[Message],
    ) -> Result<InvocationOutput, Box<dyn Error + Send + Sync>> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        if !self.instructions.is_empty() {
            messages.push(Message::system(&self.instructions));
        }
        messages.extend_from_slice(history);
        messages.push(Message::user(prompt));

        let mut tool_trace = Vec::new();

        for _ in 0..MAX_TOOL_ITERATIONS {
            let response = self.chat.send_message(&messages, self.tool_definitions()).await?;

            if response.tool_calls.is_empty() {
                return Ok(InvocationOutput {
                    content: response.content.to_string(),
                    tool_calls: tool_trace,
                });
            }

            let calls = response.tool_calls.clone();
            messages.push(response);

            for call in calls {
                let (result_text, record) = match self.find_tool(&call.name) {
                    Some(tool) => {
                        let outcome = self
                            .tool_servers
                            .call_tool(&tool.server_id, &call.name, call.arguments.clone())
                            .await;
                        match outcome {
                            Ok(result) => {
                                let text = serde_json::to_string(&result.output)
                                    .unwrap_or_else(|_| "null".to_string());
                                let success = result.success;
                                let rendered = if success {
                                    text
                                } else {
                                    format!(
                                        "error: {}",
                                        result.error.unwrap_or_else(|| "tool failed".to_string())
                                    )
                                };
                                (
                                    rendered,
                                    ToolCallRecord {
                                        tool: call.name.clone(),
                                        server_id: tool.server_id.clone(),
                                        arguments: call.arguments.clone(),
                                        success,
                                    },
                                )
                            }
                            Err(e) => (
                                // Structured failure goes back in-band; the model
                                // decides how to recover.
                                format!("error {}: {}", e.code, e.message),
                                ToolCallRecord {
                                    tool: call.name.clone(),
                                    server_id: tool.server_id.clone(),
                                    arguments: call.arguments.clone(),
                                    success: false,
                                },
                            ),
                        }
                    }
                    None => (
                        format!("error: unknown tool {}", call.name),
                        ToolCallRecord {
                            tool: call.name.clone(),
                            server_id: String::new(),
                            arguments: call.arguments.clone(),
                            success: false,
                        },
                    ),
                };

                tool_trace.push(record);
                messages.push(Message::tool_result(call.id.clone(), result_text));
            }
        }

        Err(Box::new(AgentError::ToolLoopExceeded(self.id.clone())))
    }
}
