//! Shared test doubles for agent tests.

use agentwire_core::error::{ProviderError, ToolError};
use agentwire_core::history::HistorySink;
use agentwire_core::message::Message;
use agentwire_core::provider::{
    Provider, ProviderRequest, ToolCallFragment, UpstreamEvent, UpstreamReceiver,
};
use agentwire_core::tool::Tool;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::stream_event::ClientEvent;

/// What the provider does for one upstream call.
pub enum Turn {
    Events(Vec<UpstreamEvent>),
    Fail(ProviderError),
    /// Never produces anything; the sender lives until the receiver is dropped.
    Hang,
}

type Script = Box<dyn Fn(usize) -> Turn + Send + Sync>;

/// A provider that plays back scripted turns and counts calls.
pub struct ScriptedProvider {
    script: Script,
    calls: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
    pub released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    /// Plays `turns` in order. Panics if called more often.
    pub fn new(turns: Vec<Turn>) -> Self {
        let turns = Mutex::new(turns.into_iter().map(Some).collect::<Vec<_>>());
        Self::repeating(move |n| {
            turns
                .lock()
                .unwrap()
                .get_mut(n)
                .and_then(Option::take)
                .unwrap_or_else(|| panic!("ScriptedProvider: no turn #{n}"))
        })
    }

    /// Computes each turn from the zero-based call number.
    pub fn repeating(script: impl Fn(usize) -> Turn + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: ProviderRequest) -> Result<UpstreamReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.script)(n) {
            Turn::Events(events) => {
                let (tx, rx) = mpsc::channel(events.len().max(1));
                for event in events {
                    tx.try_send(Ok(event)).unwrap();
                }
                Ok(rx)
            }
            Turn::Fail(error) => Err(error),
            Turn::Hang => {
                let (tx, rx) = mpsc::channel(1);
                let released = Arc::clone(&self.released);
                tokio::spawn(async move {
                    tx.closed().await;
                    released.store(true, Ordering::SeqCst);
                });
                Ok(rx)
            }
        }
    }
}

fn chunk(delta: Value) -> Value {
    json!({ "choices": [{ "index": 0, "delta": delta, "finish_reason": null }] })
}

/// A turn that answers in free text.
pub fn content_turn(text: &str) -> Turn {
    Turn::Events(vec![
        UpstreamEvent::Raw(chunk(json!({ "role": "assistant", "content": text }))),
        UpstreamEvent::ContentFragment(text.to_string()),
        UpstreamEvent::Terminal,
    ])
}

/// A turn that requests the given calls, each in one fragment.
pub fn tool_turn(calls: &[(&str, &str, Value)]) -> Turn {
    let mut events = Vec::new();
    for (index, (id, name, arguments)) in calls.iter().enumerate() {
        events.push(UpstreamEvent::Raw(chunk(json!({ "tool_calls": [] }))));
        events.push(UpstreamEvent::ToolCallFragment(ToolCallFragment {
            index: index as u32,
            id: Some(id.to_string()),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        }));
    }
    events.push(UpstreamEvent::Terminal);
    Turn::Events(events)
}

/// A tool that counts invocations and either echoes or reports failure.
pub struct CountingTool {
    name: String,
    failure: Option<String>,
    pub calls: Arc<AtomicUsize>,
    pub last_arguments: Arc<Mutex<Option<Value>>>,
}

impl CountingTool {
    pub fn succeeding(name: &str) -> Self {
        Self {
            name: name.into(),
            failure: None,
            calls: Arc::new(AtomicUsize::new(0)),
            last_arguments: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(name: &str, error: &str) -> Self {
        Self {
            failure: Some(error.into()),
            ..Self::succeeding(name)
        }
    }
}

#[async_trait::async_trait]
impl Tool for CountingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, arguments: Value) -> Result<Value, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_arguments.lock().unwrap() = Some(arguments.clone());
        Ok(match &self.failure {
            Some(error) => json!({ "success": false, "error": error }),
            None => json!({ "echo": arguments }),
        })
    }
}

/// A tool that takes `delay` to answer.
pub struct SlowTool {
    pub delay: Duration,
}

#[async_trait::async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "sleeps"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object" })
    }

    async fn execute(&self, _arguments: Value) -> Result<Value, ToolError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!("done"))
    }
}

/// A history sink that only records which users were flushed.
#[derive(Default)]
pub struct FlushRecorder {
    pub flushed: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl HistorySink for FlushRecorder {
    fn append(&self, _user_id: &str, _message: &Message) {}

    async fn flush(&self, user_id: &str) {
        self.flushed.lock().unwrap().push(user_id.to_string());
    }
}

/// Everything currently queued on `rx`.
pub fn drain(rx: &mut mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Every event until the stream closes.
pub async fn collect(mut rx: mpsc::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
