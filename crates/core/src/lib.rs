//! # agentwire core
//!
//! Domain types, traits, and error definitions shared by every agentwire crate.
//! Nothing here talks to the network or the filesystem; the other crates
//! implement these traits.
//!
//! - [`Provider`]: an upstream model producing a stream of [`UpstreamEvent`]s
//! - [`Tool`] / [`ToolRegistry`]: named capabilities the agent can invoke
//! - [`HistorySink`]: fire-and-forget per-user chat history

pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{Error, HistoryError, ProviderError, Result, ToolError};
pub use history::{HistoryEntry, HistorySink};
pub use message::{ChatRequest, Conversation, DEFAULT_USER_ID, Message, MessageToolCall, Role};
pub use provider::{
    Provider, ProviderRequest, ToolCallFragment, ToolDefinition, UpstreamEvent, UpstreamReceiver,
};
pub use tool::{Tool, ToolCallRequest, ToolRegistry, ToolResult};
