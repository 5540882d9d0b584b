//! Client-facing stream events and the per-request emitter.
//!
//! Two logical channels share one SSE stream:
//! - `reasoning`: foldable thought / action / observation entries,
//!   serialised as `{"type":"reasoning","content":...}`
//! - final answer: one non-foldable chat-completion chunk per request
//!
//! Replayed upstream chunks, error objects and the literal `[DONE]`
//! terminal marker complete the set.

use agentwire_core::error::Error;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// The literal terminal token.
pub const DONE_MARKER: &str = "[DONE]";

/// One event sent to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A foldable reasoning-trace entry.
    Reasoning { content: String },

    /// The non-foldable final answer, already framed for display.
    FinalAnswer { content: String },

    /// An upstream chunk replayed verbatim.
    Passthrough(Value),

    /// A request-level failure; always followed by `Done`.
    Error { code: Option<String>, message: String },

    /// End of stream.
    Done,
}

impl ClientEvent {
    /// Short name used in logs.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Reasoning { .. } => "reasoning",
            Self::FinalAnswer { .. } => "final_answer",
            Self::Passthrough(_) => "passthrough",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// The `data:` payload for this event.
    pub fn to_sse_data(&self) -> String {
        match self {
            Self::Reasoning { content } => {
                json!({ "type": "reasoning", "content": content }).to_string()
            }
            Self::FinalAnswer { content } => final_answer_chunk(content).to_string(),
            Self::Passthrough(raw) => raw.to_string(),
            Self::Error { code, message } => {
                json!({ "error": { "code": code, "message": message } }).to_string()
            }
            Self::Done => DONE_MARKER.to_string(),
        }
    }
}

/// Chat-completion-chunk framing for the final answer.
fn final_answer_chunk(content: &str) -> Value {
    let now = chrono::Utc::now();
    json!({
        "id": format!("msg_{}", now.timestamp_millis()),
        "object": "chat.completion.chunk",
        "created": now.timestamp(),
        "model": "react-agent",
        "choices": [{
            "index": 0,
            "delta": { "role": "assistant", "content": content },
            "finish_reason": "stop"
        }],
        "metadata": {
            "foldable": false,
            "foldableType": "final_answer",
            "messageType": "final_answer"
        }
    })
}

/// Exclusive writer of one request's output stream.
///
/// Owns the per-request step counter and reasoning log. Guarantees one
/// terminal marker: `finish` is idempotent, and dropping an unfinished
/// emitter still queues `Done`. A failed send means the client is gone;
/// the request's cancellation token is fired and `Error::Cancelled` is
/// returned so the caller stops working.
pub struct ClientEventEmitter {
    tx: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
    step: u32,
    reasoning_log: Vec<String>,
    answered: bool,
    finished: bool,
}

impl ClientEventEmitter {
    pub fn new(tx: mpsc::Sender<ClientEvent>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            step: 0,
            reasoning_log: Vec::new(),
            answered: false,
            finished: false,
        }
    }

    /// Number of thoughts emitted so far.
    pub fn steps(&self) -> u32 {
        self.step
    }

    /// Every reasoning entry sent, in order.
    pub fn reasoning_log(&self) -> &[String] {
        &self.reasoning_log
    }

    pub fn has_answered(&self) -> bool {
        self.answered
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn thought(&mut self, text: &str) -> Result<(), Error> {
        self.step += 1;
        debug!(step = self.step, "Thought");
        let content = format!("💭 **Thought (Step {}):**\n{text}", self.step);
        self.reasoning(content).await
    }

    pub async fn action(&mut self, tool: &str, arguments: &Value) -> Result<(), Error> {
        self.reasoning(format!("🔧 **Action:** calling tool `{tool}`"))
            .await?;
        self.reasoning(format!("📋 **Arguments:** `{arguments}`"))
            .await
    }

    pub async fn observation(&mut self, summary: &str) -> Result<(), Error> {
        self.reasoning(format!("👁️ **Observation:** {summary}"))
            .await
    }

    /// Send the final answer. Only the first call per request is sent.
    pub async fn final_answer(&mut self, answer: &str) -> Result<(), Error> {
        if self.answered {
            warn!("Final answer already sent; ignoring another");
            return Ok(());
        }
        self.answered = true;
        self.emit(ClientEvent::FinalAnswer {
            content: format!("✅ **Final Answer:**\n{answer}\n"),
        })
        .await
    }

    pub async fn passthrough(&mut self, raw: Value) -> Result<(), Error> {
        self.emit(ClientEvent::Passthrough(raw)).await
    }

    pub async fn error(&mut self, code: Option<String>, message: impl Into<String>) -> Result<(), Error> {
        self.emit(ClientEvent::Error {
            code,
            message: message.into(),
        })
        .await
    }

    /// Send the terminal marker once. Later calls do nothing.
    pub async fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        if self.tx.send(ClientEvent::Done).await.is_err() {
            trace!("Client gone before the terminal marker");
        }
    }

    async fn reasoning(&mut self, content: String) -> Result<(), Error> {
        self.reasoning_log.push(content.clone());
        self.emit(ClientEvent::Reasoning { content }).await
    }

    async fn emit(&mut self, event: ClientEvent) -> Result<(), Error> {
        if self.finished {
            warn!(event = event.event_type(), "Event after stream end dropped");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        trace!(event = event.event_type(), "Emitting client event");
        if self.tx.send(event).await.is_err() {
            self.cancel.cancel();
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Drop for ClientEventEmitter {
    fn drop(&mut self) {
        if !self.finished {
            self.finished = true;
            let _ = self.tx.try_send(ClientEvent::Done);
        }
    }
}
