//! Upstream model access for agentwire.
//!
//! - [`SseParser`] decodes the chunked `text/event-stream` body
//! - [`ToolCallAccumulator`] folds tool-call fragments into requests
//! - [`OpenAiCompatProvider`] implements `agentwire_core::Provider` over HTTPS

pub mod accumulator;
pub mod openai_compat;
pub mod sse;

pub use accumulator::ToolCallAccumulator;
pub use openai_compat::OpenAiCompatProvider;
pub use sse::SseParser;
