//! The agentwire agent: a ReAct loop over a streaming upstream model.
//!
//! For each request the agent follows a **Reason → Act → Observe** cycle:
//!
//! 1. **Seed** the conversation with the system prompt (once)
//! 2. **Ask** the upstream model and fold its stream into tool calls
//! 3. **Recover** missed intents with keyword detection on the first pass
//! 4. **Act**: run each call through the retry and self-correction engine
//! 5. **Answer**: synthesize the final answer from the tool results
//!
//! Every step is narrated to the client as a [`ClientEvent`].

pub mod correction;
pub mod executor;
pub mod fallback;
pub mod loop_runner;
pub mod prompt;
pub mod stream_event;
pub mod synthesis;

#[cfg(test)]
mod test_helpers;

pub use correction::{Correction, CorrectionEngine};
pub use executor::{EXHAUSTED_SUGGESTION, ToolExecutor};
pub use fallback::FallbackIntentDetector;
pub use loop_runner::{AgentLoop, AgentSettings, Outcome, RunSummary};
pub use prompt::system_prompt;
pub use stream_event::{ClientEvent, ClientEventEmitter, DONE_MARKER};
pub use synthesis::{observation_summary, synthesize_answer};
