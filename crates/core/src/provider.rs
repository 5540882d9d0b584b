//! Provider trait, the abstraction over the upstream model.
//!
//! A provider takes a conversation plus tool declarations and returns a
//! channel of [`UpstreamEvent`]s decoded from the model's chunked stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// One upstream call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,

    /// The full conversation so far
    pub messages: Vec<Message>,

    /// Tools the model may call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,

    /// Always `"auto"` for agent requests
    #[serde(default = "default_tool_choice")]
    pub tool_choice: String,

    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_tool_choice() -> String {
    "auto".into()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_stream() -> bool {
    true
}

impl ProviderRequest {
    /// A streaming request with automatic tool choice.
    pub fn streaming(
        model: impl Into<String>,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        Self {
            model: model.into(),
            messages,
            tools,
            tool_choice: default_tool_choice(),
            max_tokens: 4000,
            temperature: default_temperature(),
            stream: true,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A partial tool call as it appears in one stream chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// A structured event decoded from the upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The decoded payload exactly as received, kept for verbatim replay.
    Raw(serde_json::Value),
    ContentFragment(String),
    ToolCallFragment(ToolCallFragment),
    /// `[DONE]`, or end of transport without one.
    Terminal,
    /// An explicit error object; nothing follows it.
    Error {
        code: Option<String>,
        message: String,
    },
}

impl UpstreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpstreamEvent::Terminal | UpstreamEvent::Error { .. })
    }
}

/// The receiving half of an upstream event stream.
pub type UpstreamReceiver = mpsc::Receiver<std::result::Result<UpstreamEvent, ProviderError>>;

/// The core Provider trait.
///
/// Dropping the returned receiver must stop the provider's background work
/// and release the underlying connection.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get the decoded event stream.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<UpstreamReceiver, ProviderError>;
}
