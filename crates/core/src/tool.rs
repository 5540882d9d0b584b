//! Tool trait, the abstraction over agent capabilities.
//!
//! Tools are registered by name in a [`ToolRegistry`]; the agent loop
//! advertises their definitions to the model and dispatches tool calls
//! through the registry, never through a conditional chain over names.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ToolError;
use crate::message::{Message, MessageToolCall};
use crate::provider::ToolDefinition;

/// A completed tool call, folded from fragments or synthesized by fallback detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub index: u32,
    pub name: String,
    /// Raw argument text as streamed by the model
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, index: u32, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            index,
            name: name.into(),
            arguments: arguments.to_string(),
        }
    }

    /// Parse the raw argument text. Blank text is an empty object.
    pub fn parse_arguments(&self) -> std::result::Result<Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.arguments)
    }

    pub fn to_message_call(&self) -> MessageToolCall {
        MessageToolCall {
            id: self.id.clone(),
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// The outcome of one executed tool call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub success: bool,
    /// Tool output, or the structured failure payload
    pub content: Value,
}

impl ToolResult {
    /// The `tool` message appended to the conversation for this result.
    pub fn to_message(&self) -> Message {
        let content = match &self.content {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Message::tool_result(&self.tool_call_id, &self.name, content)
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "calculate").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool. Invalid input the tool can detect itself is
    /// reported as `Ok({"success": false, "error": ...})`.
    async fn execute(&self, arguments: Value) -> std::result::Result<Value, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the model.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A registry of available tools, kept in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.by_name.get(name).map(|&slot| self.tools[slot].as_ref())
    }

    /// Tool definitions advertised to the model.
    pub fn declare(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// Execute a tool by name.
    ///
    /// A `{"success": false, "error": ...}` payload is turned into
    /// [`ToolError::ExecutionFailed`] so callers see one failure shape.
    pub async fn execute(&self, name: &str, arguments: Value) -> std::result::Result<Value, ToolError> {
        let tool = self.get(name).ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let output = tool.execute(arguments).await?;
        if output.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = output
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("tool reported failure")
                .to_string();
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason,
            });
        }
        Ok(output)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
