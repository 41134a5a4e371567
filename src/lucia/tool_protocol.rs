//! Tool metadata and result types shared by tool servers and agents.
//!
//! External tool servers publish tools described by a name, a description, and
//! JSON Schemas for their inputs and outputs.  Agents receive the metadata as
//! [`ToolDefinition`](crate::client_wrapper::ToolDefinition)s on the chat
//! request; tool invocations come back as [`ToolResult`] values.  Failures stay
//! structured — a tool call never raises out of the server registry, it yields a
//! [`ToolCallError`] `{code, message}` value that the invoking agent renders as
//! a tool result and can recover from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;

use crate::lucia::client_wrapper::ToolDefinition;

/// Represents the result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution was successful.
    pub success: bool,
    /// The output data from the tool.
    pub output: serde_json::Value,
    /// Optional error message if execution failed.
    pub error: Option<String>,
    /// Metadata about the execution (timing, server id, etc.).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ToolResult {
    /// Convenience constructor for successful tool execution.
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Convenience constructor for failed tool execution.
    pub fn failure(error: String) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Attach server or application specific metadata to the result.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Metadata about one tool published by a tool server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the accepted arguments object.
    pub input_schema: serde_json::Value,
    /// JSON Schema describing the produced output, when the server declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
}

impl ToolMetadata {
    /// Create metadata with the supplied identifier and description and an
    /// empty-object input schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            output_schema: None,
        }
    }

    /// Replace the input schema.
    pub fn with_input_schema(mut self, schema: serde_json::Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Declare an output schema.
    pub fn with_output_schema(mut self, schema: serde_json::Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Render this metadata as the provider-facing tool definition.
    pub fn to_tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.input_schema.clone(),
        }
    }
}

/// Structured `{code, message}` error returned by a failed tool call.
///
/// Codes follow JSON-RPC conventions where the transport supplies one;
/// registry-level failures use the named constructors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallError {
    pub code: i64,
    pub message: String,
}

impl ToolCallError {
    /// The requested tool is not published by the server.
    pub fn not_found(tool_name: &str) -> Self {
        Self {
            code: -32601,
            message: format!("tool not found: {}", tool_name),
        }
    }

    /// The server is not in the `Connected` state.
    pub fn not_connected(server_id: &str) -> Self {
        Self {
            code: -32000,
            message: format!("tool server not connected: {}", server_id),
        }
    }

    /// Transport-level failure while talking to the server.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            code: -32001,
            message: message.into(),
        }
    }

    /// The server answered, but with a malformed or error payload.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            code: -32002,
            message: message.into(),
        }
    }
}

impl fmt::Display for ToolCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool call failed ({}): {}", self.code, self.message)
    }
}

impl Error for ToolCallError {}
