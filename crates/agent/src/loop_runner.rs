//! The agent iteration loop.
//!
//! Each request runs `request upstream → collect tool calls (falling back to
//! intent detection on the first pass) → dedupe → execute with retry →
//! synthesize`, bounded by `max_iterations`. In the default one-round mode
//! the request ends after the first tool round; with `continue_after_tools`
//! the tool results are fed back and the model gets another turn.

use agentwire_config::AppConfig;
use agentwire_core::error::{Error, ProviderError};
use agentwire_core::history::HistorySink;
use agentwire_core::message::{ChatRequest, Conversation, Message};
use agentwire_core::provider::{Provider, ProviderRequest, UpstreamEvent};
use agentwire_core::tool::{ToolCallRequest, ToolRegistry, ToolResult};
use agentwire_providers::ToolCallAccumulator;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::correction::CorrectionEngine;
use crate::executor::ToolExecutor;
use crate::fallback::FallbackIntentDetector;
use crate::prompt::system_prompt;
use crate::stream_event::{ClientEvent, ClientEventEmitter};
use crate::synthesis::synthesize_answer;

/// Buffered client events per request before the worker waits on the client.
const EVENT_BUFFER: usize = 128;

/// Tunables of one agent, resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_iterations: u32,
    pub max_tool_attempts: u32,
    pub tool_timeout: Duration,
    pub upstream_timeout: Duration,
    /// Feed tool results back to the model instead of answering after one round.
    pub continue_after_tools: bool,
}

impl AgentSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.upstream.model.clone(),
            max_tokens: config.upstream.max_tokens,
            temperature: config.upstream.temperature,
            max_iterations: config.agent.max_iterations.max(1),
            max_tool_attempts: config.agent.max_tool_attempts.max(1),
            tool_timeout: Duration::from_secs(config.agent.tool_timeout_secs),
            upstream_timeout: config.upstream.timeout(),
            continue_after_tools: config.agent.continue_after_tools,
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A final answer was synthesized from tool results.
    Answered,
    /// The model answered in free text, replayed verbatim.
    Replayed,
    /// A later iteration repeated only calls already executed for this turn.
    Stale,
    /// `max_iterations` was reached.
    IterationLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u32,
    pub tool_calls_executed: usize,
    pub outcome: Outcome,
}

/// What one upstream call produced.
#[derive(Debug, Default)]
struct UpstreamTurn {
    raw: Vec<Value>,
    content: String,
    calls: Vec<ToolCallRequest>,
}

/// The core agent loop that orchestrates upstream calls and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    history: Arc<dyn HistorySink>,
    settings: AgentSettings,
    detector: FallbackIntentDetector,
    corrections: CorrectionEngine,
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        history: Arc<dyn HistorySink>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            provider,
            tools,
            history,
            settings,
            detector: FallbackIntentDetector::new(),
            corrections: CorrectionEngine::new(),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run `request` on a background task and return its event stream.
    ///
    /// The stream always ends with [`ClientEvent::Done`]. Dropping the
    /// receiver cancels the request: the upstream call is abandoned and no
    /// further tools run.
    pub fn run_stream(self: Arc<Self>, request: ChatRequest) -> mpsc::Receiver<ClientEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let user_id = request.user_id().to_string();

        let watcher_tx = tx.clone();
        let watcher_cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = watcher_tx.closed() => {
                    debug!("Client disconnected; cancelling request");
                    watcher_cancel.cancel();
                }
                _ = watcher_cancel.cancelled() => {}
            }
        });

        tokio::spawn(async move {
            let mut emitter = ClientEventEmitter::new(tx, cancel.clone());
            match self.run(request, &mut emitter, &cancel).await {
                Ok(summary) => info!(
                    iterations = summary.iterations,
                    tools = summary.tool_calls_executed,
                    outcome = ?summary.outcome,
                    "Request finished"
                ),
                Err(Error::Cancelled) => debug!("Request cancelled"),
                Err(err) => {
                    warn!(error = %err, "Request failed");
                    if emitter.error(err.code(), client_message(&err)).await.is_err() {
                        trace!("Client gone before the error event");
                    }
                }
            }
            emitter.finish().await;
            // Ends the watcher if the client is still connected.
            cancel.cancel();
            self.history.flush(&user_id).await;
        });

        rx
    }

    /// Drive one request to completion, writing every event to `emitter`.
    ///
    /// Does not send the terminal marker; the caller owns `emitter.finish()`.
    pub async fn run(
        &self,
        request: ChatRequest,
        emitter: &mut ClientEventEmitter,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, Error> {
        let user_id = request.user_id().to_string();
        let mut conversation = Conversation::new(request.messages);
        info!(user_id = %user_id, messages = conversation.len(), "Agent request started");

        if let Some(last) = conversation.last_user() {
            self.history.append(&user_id, last);
        }
        let query = conversation
            .last_user()
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if conversation.ensure_system(system_prompt(
            &self.tools.declare(),
            self.settings.max_tool_attempts,
        )) {
            debug!("System prompt inserted");
        }

        emitter
            .thought(&format!(
                "Analysing the query: \"{query}\"\nDetection modes: native tool calls from the model, then keyword intent detection (calculation, date/time, web search, image search)."
            ))
            .await?;

        let mut executed: HashSet<String> = HashSet::new();
        let mut results: Vec<ToolResult> = Vec::new();

        for iteration in 1..=self.settings.max_iterations {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            info!(iteration, "Iteration started");
            let turn = self.request_upstream(&conversation, cancel).await?;

            let mut calls = turn.calls;
            if calls.is_empty() && iteration == 1 {
                calls = self.detector.detect(&conversation);
                if !calls.is_empty() {
                    info!(count = calls.len(), "Tool calls derived from the user message");
                }
            }

            if calls.is_empty() {
                info!(iteration, "No tool calls; replaying upstream content");
                for raw in turn.raw {
                    emitter.passthrough(raw).await?;
                }
                if !turn.content.is_empty() {
                    self.history
                        .append(&user_id, &Message::assistant(turn.content));
                }
                return Ok(RunSummary {
                    iterations: iteration,
                    tool_calls_executed: results.len(),
                    outcome: Outcome::Replayed,
                });
            }

            // The user turn cannot change within a request, so a round made
            // only of calls that already ran has nothing new to work on.
            let calls = skip_executed(dedupe(calls), &executed);
            if calls.is_empty() {
                info!(iteration, "Only repeated tool calls for the same user turn; stopping");
                self.answer_partial(&user_id, &results, emitter).await?;
                return Ok(RunSummary {
                    iterations: iteration,
                    tool_calls_executed: results.len(),
                    outcome: Outcome::Stale,
                });
            }
            executed.extend(calls.iter().map(|call| call.id.clone()));

            conversation.push(Message::assistant_tool_calls(
                calls.iter().map(ToolCallRequest::to_message_call).collect(),
            ));

            let executor = ToolExecutor::new(
                &self.tools,
                &self.corrections,
                self.settings.max_tool_attempts,
                self.settings.tool_timeout,
            );
            for call in &calls {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let result = executor.execute(call, emitter).await?;
                conversation.push(result.to_message());
                results.push(result);
            }

            if !self.settings.continue_after_tools {
                emitter
                    .thought("All tool calls finished; composing the final answer from the observations.")
                    .await?;
                self.answer(&user_id, &results, emitter).await?;
                return Ok(RunSummary {
                    iterations: iteration,
                    tool_calls_executed: results.len(),
                    outcome: Outcome::Answered,
                });
            }

            emitter
                .thought("Tool results recorded; handing them back to the model.")
                .await?;
        }

        info!(
            max_iterations = self.settings.max_iterations,
            "Iteration limit reached"
        );
        self.answer_partial(&user_id, &results, emitter).await?;
        Ok(RunSummary {
            iterations: self.settings.max_iterations,
            tool_calls_executed: results.len(),
            outcome: Outcome::IterationLimit,
        })
    }

    /// Send the conversation upstream and fold the stream into one turn.
    async fn request_upstream(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<UpstreamTurn, Error> {
        let request = ProviderRequest::streaming(
            self.settings.model.clone(),
            conversation.messages().to_vec(),
            self.tools.declare(),
        )
        .with_max_tokens(self.settings.max_tokens)
        .with_temperature(self.settings.temperature);
        debug!(
            provider = self.provider.name(),
            model = %request.model,
            tools = request.tools.len(),
            messages = request.messages.len(),
            "Upstream request"
        );

        let drive = async {
            let mut rx = self.provider.stream(request).await?;
            let mut turn = UpstreamTurn::default();
            let mut accumulator = ToolCallAccumulator::new();
            while let Some(event) = rx.recv().await {
                match event? {
                    UpstreamEvent::Raw(raw) => turn.raw.push(raw),
                    UpstreamEvent::ContentFragment(text) => {
                        trace!(fragment = %text, "Content fragment");
                        turn.content.push_str(&text);
                    }
                    UpstreamEvent::ToolCallFragment(fragment) => accumulator.push(fragment),
                    UpstreamEvent::Terminal => {
                        debug!(pending_calls = accumulator.len(), "Upstream stream finished");
                        break;
                    }
                    UpstreamEvent::Error { code, message } => {
                        return Err(ProviderError::Upstream { code, message });
                    }
                }
            }
            turn.calls = accumulator.finish();
            debug!(calls = turn.calls.len(), content_len = turn.content.len(), "Upstream turn collected");
            Ok::<_, ProviderError>(turn)
        };

        let timeout = self.settings.upstream_timeout;
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            outcome = tokio::time::timeout(timeout, drive) => match outcome {
                Ok(turn) => Ok(turn?),
                Err(_) => Err(ProviderError::Timeout(format!(
                    "no complete response within {}s",
                    timeout.as_secs()
                ))
                .into()),
            },
        }
    }

    async fn answer(
        &self,
        user_id: &str,
        results: &[ToolResult],
        emitter: &mut ClientEventEmitter,
    ) -> Result<(), Error> {
        let answer = synthesize_answer(results);
        info!(tools = results.len(), "Final answer emitted");
        emitter.final_answer(&answer).await?;
        self.history.append(user_id, &Message::assistant(answer));
        Ok(())
    }

    /// Close a request that stopped early with whatever results exist.
    async fn answer_partial(
        &self,
        user_id: &str,
        results: &[ToolResult],
        emitter: &mut ClientEventEmitter,
    ) -> Result<(), Error> {
        if results.is_empty() {
            emitter
                .thought("Stopping without tool results; no answer could be composed.")
                .await?;
            return Ok(());
        }
        emitter
            .thought("Stopping early; composing the answer from the results gathered so far.")
            .await?;
        self.answer(user_id, results, emitter).await
    }
}

/// First occurrence of each id wins.
fn dedupe(calls: Vec<ToolCallRequest>) -> Vec<ToolCallRequest> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| {
            let fresh = seen.insert(call.id.clone());
            if !fresh {
                warn!(id = %call.id, tool = %call.name, "Duplicate tool call id dropped");
            }
            fresh
        })
        .collect()
}

/// Drop calls whose id already ran earlier in this request.
fn skip_executed(calls: Vec<ToolCallRequest>, executed: &HashSet<String>) -> Vec<ToolCallRequest> {
    calls
        .into_iter()
        .filter(|call| {
            let repeated = executed.contains(&call.id);
            if repeated {
                warn!(id = %call.id, tool = %call.name, "Tool call already executed in this request; skipped");
            }
            !repeated
        })
        .collect()
}

/// Text shown to the client in an error event.
fn client_message(err: &Error) -> String {
    match err {
        Error::Provider(ProviderError::Upstream { message, .. }) => message.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{
        CountingTool, FlushRecorder, ScriptedProvider, Turn, collect, content_turn, tool_turn,
    };
    use agentwire_core::message::Role;
    use agentwire_memory::InMemoryHistory;
    use agentwire_tools::{CalculatorTool, default_registry};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn agent(
        provider: &Arc<ScriptedProvider>,
        tools: ToolRegistry,
        settings: AgentSettings,
    ) -> (Arc<AgentLoop>, Arc<InMemoryHistory>) {
        let history = Arc::new(InMemoryHistory::default());
        let provider: Arc<dyn Provider> = provider.clone();
        let sink: Arc<dyn HistorySink> = history.clone();
        (
            Arc::new(AgentLoop::new(provider, Arc::new(tools), sink, settings)),
            history,
        )
    }

    fn ask(text: &str) -> ChatRequest {
        ChatRequest::new(vec![Message::user(text)])
    }

    fn reasoning(events: &[ClientEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Reasoning { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    fn final_answer(events: &[ClientEvent]) -> Option<&str> {
        events.iter().find_map(|e| match e {
            ClientEvent::FinalAnswer { content } => Some(content.as_str()),
            _ => None,
        })
    }

    fn multi_round() -> AgentSettings {
        AgentSettings {
            continue_after_tools: true,
            ..AgentSettings::default()
        }
    }

    #[tokio::test]
    async fn calculation_is_recovered_from_free_text() {
        let provider = Arc::new(ScriptedProvider::new(vec![content_turn(
            "Let me work that out.",
        )]));
        let (agent, history) = agent(&provider, default_registry(), AgentSettings::default());

        let events = collect(agent.run_stream(ask("calculate 12 + 7"))).await;

        let answer = final_answer(&events).expect("final answer");
        assert!(answer.contains("12+7 = 19"));
        assert_eq!(events.last(), Some(&ClientEvent::Done));
        assert!(reasoning(&events)[0].contains("calculate 12 + 7"));
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, ClientEvent::Passthrough(_)))
        );

        let stored = history.entries("default_user");
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].content, "12+7 = 19");
    }

    #[tokio::test]
    async fn exhausted_tool_degrades_to_a_complete_answer() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(&[(
            "s1",
            "lookupStock",
            json!({"symbol": "ACME"}),
        )])]));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(CountingTool::failing(
            "lookupStock",
            "quote service unavailable",
        )));
        let (agent, _) = agent(&provider, tools, AgentSettings::default());

        let events = collect(agent.run_stream(ask("what is ACME trading at?"))).await;

        let attempt_entries = reasoning(&events)
            .into_iter()
            .filter(|e| e.contains("attempt"))
            .count();
        assert_eq!(attempt_entries, 2);
        assert!(
            final_answer(&events)
                .expect("final answer")
                .contains("temporarily unavailable")
        );
        assert!(!events.iter().any(|e| matches!(e, ClientEvent::Error { .. })));
        assert_eq!(events.last(), Some(&ClientEvent::Done));
    }

    #[tokio::test]
    async fn later_free_text_is_replayed_without_fallback() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("t1", "echo", json!({"x": 1}))]),
            content_turn("All done."),
        ]));
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(CountingTool::succeeding("echo")));
        tools.register(Box::new(CalculatorTool));
        let (agent, history) = agent(&provider, tools, multi_round());

        let events = collect(agent.run_stream(ask("calculate 12 + 7"))).await;

        let passthrough: Vec<&Value> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Passthrough(raw) => Some(raw),
                _ => None,
            })
            .collect();
        assert_eq!(passthrough.len(), 1);
        assert_eq!(passthrough[0]["choices"][0]["delta"]["content"], "All done.");
        assert!(final_answer(&events).is_none());
        assert!(
            !reasoning(&events)
                .iter()
                .any(|e| e.contains("`calculate`"))
        );
        assert_eq!(provider.call_count(), 2);

        let second = &provider.requests()[1];
        assert!(second.messages.iter().any(|m| m.role == Role::Tool));
        assert_eq!(
            history.entries("default_user").last().map(|e| e.content.clone()),
            Some("All done.".to_string())
        );
    }

    #[tokio::test]
    async fn duplicate_ids_execute_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![tool_turn(&[
            ("dup", "echo", json!({"n": 1})),
            ("dup", "echo", json!({"n": 2})),
        ])]));
        let tool = CountingTool::succeeding("echo");
        let calls = Arc::clone(&tool.calls);
        let seen = Arc::clone(&tool.last_arguments);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));
        let (agent, _) = agent(&provider, tools, AgentSettings::default());

        let events = collect(agent.run_stream(ask("echo twice"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), Some(json!({"n": 1})));
        assert!(final_answer(&events).is_some());
    }

    #[tokio::test]
    async fn loop_stops_at_iteration_cap() {
        let provider = Arc::new(ScriptedProvider::repeating(|n| {
            let id = format!("call_{n}");
            tool_turn(&[(id.as_str(), "echo", json!({ "n": n }))])
        }));
        let tool = CountingTool::succeeding("echo");
        let calls = Arc::clone(&tool.calls);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));
        let (agent, _) = agent(&provider, tools, multi_round());

        let (tx, rx) = mpsc::channel(1024);
        let cancel = CancellationToken::new();
        let mut emitter = ClientEventEmitter::new(tx, cancel.clone());
        let summary = agent.run(ask("keep going"), &mut emitter, &cancel).await.unwrap();
        emitter.finish().await;
        drop(emitter);

        assert_eq!(summary.outcome, Outcome::IterationLimit);
        assert_eq!(summary.iterations, 10);
        assert_eq!(provider.call_count(), 10);
        assert_eq!(calls.load(Ordering::SeqCst), 10);

        let events = collect(rx).await;
        assert!(final_answer(&events).is_some());
        assert_eq!(events.last(), Some(&ClientEvent::Done));
    }

    #[tokio::test]
    async fn repeated_tool_round_stops_as_stale() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("t1", "echo", json!({"n": 1}))]),
            tool_turn(&[("t1", "echo", json!({"n": 1}))]),
        ]));
        let tool = CountingTool::succeeding("echo");
        let calls = Arc::clone(&tool.calls);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));
        let (agent, _) = agent(&provider, tools, multi_round());

        let (tx, rx) = mpsc::channel(256);
        let cancel = CancellationToken::new();
        let mut emitter = ClientEventEmitter::new(tx, cancel.clone());
        let summary = agent.run(ask("echo once"), &mut emitter, &cancel).await.unwrap();
        emitter.finish().await;
        drop(emitter);

        assert_eq!(summary.outcome, Outcome::Stale);
        assert_eq!(summary.iterations, 2);
        assert_eq!(summary.tool_calls_executed, 1);
        assert_eq!(provider.call_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let events = collect(rx).await;
        assert!(final_answer(&events).is_some());
        assert_eq!(events.last(), Some(&ClientEvent::Done));
    }

    #[tokio::test]
    async fn only_new_calls_run_in_later_rounds() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            tool_turn(&[("t1", "echo", json!({"n": 1}))]),
            tool_turn(&[("t1", "echo", json!({"n": 1})), ("t2", "echo", json!({"n": 2}))]),
            content_turn("Both done."),
        ]));
        let tool = CountingTool::succeeding("echo");
        let calls = Arc::clone(&tool.calls);
        let seen = Arc::clone(&tool.last_arguments);
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(tool));
        let (agent, _) = agent(&provider, tools, multi_round());

        let events = collect(agent.run_stream(ask("echo twice"))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(*seen.lock().unwrap(), Some(json!({"n": 2})));
        assert_eq!(provider.call_count(), 3);
        let third = &provider.requests()[2];
        assert_eq!(third.messages.iter().filter(|m| m.role == Role::Tool).count(), 2);
        assert!(events.iter().any(|e| matches!(e, ClientEvent::Passthrough(_))));
    }

    #[tokio::test]
    async fn stream_flushes_only_the_requesting_user() {
        let provider = Arc::new(ScriptedProvider::new(vec![content_turn("hi")]));
        let history = Arc::new(FlushRecorder::default());
        let sink: Arc<dyn HistorySink> = history.clone();
        let provider: Arc<dyn Provider> = provider;
        let agent = Arc::new(AgentLoop::new(
            provider,
            Arc::new(default_registry()),
            sink,
            AgentSettings::default(),
        ));

        let mut request = ask("hello");
        request.user_id = Some("alice".into());
        collect(agent.run_stream(request)).await;

        assert_eq!(*history.flushed.lock().unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn upstream_error_is_reported_then_stream_ends() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Events(vec![
            UpstreamEvent::Error {
                code: Some("rate_limit".into()),
                message: "slow down".into(),
            },
        ])]));
        let (agent, _) = agent(&provider, default_registry(), AgentSettings::default());

        let events = collect(agent.run_stream(ask("hello"))).await;

        let n = events.len();
        assert!(n >= 2);
        assert_eq!(
            events[n - 2],
            ClientEvent::Error {
                code: Some("rate_limit".into()),
                message: "slow down".into(),
            }
        );
        assert_eq!(events[n - 1], ClientEvent::Done);
        assert!(final_answer(&events).is_none());
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Fail(
            ProviderError::AuthenticationFailed("bad key".into()),
        )]));
        let (agent, _) = agent(&provider, default_registry(), AgentSettings::default());

        let events = collect(agent.run_stream(ask("hello"))).await;

        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Error { message, .. } if message.contains("bad key")
        )));
        assert_eq!(events.last(), Some(&ClientEvent::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_upstream_times_out() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Hang]));
        let settings = AgentSettings {
            upstream_timeout: Duration::from_secs(30),
            ..AgentSettings::default()
        };
        let (agent, _) = agent(&provider, default_registry(), settings);

        let events = collect(agent.run_stream(ask("hello"))).await;

        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::Error { code, .. } if code.as_deref() == Some("upstream_timeout")
        )));
        assert_eq!(events.last(), Some(&ClientEvent::Done));
    }

    #[tokio::test]
    async fn disconnect_cancels_the_upstream_call() {
        let provider = Arc::new(ScriptedProvider::new(vec![Turn::Hang]));
        let released = Arc::clone(&provider.released);
        let (agent, _) = agent(&provider, default_registry(), AgentSettings::default());

        let mut rx = agent.run_stream(ask("hello"));
        assert!(matches!(rx.recv().await, Some(ClientEvent::Reasoning { .. })));
        drop(rx);

        for _ in 0..200 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_stops_before_upstream() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let (agent, _) = agent(&provider, default_registry(), AgentSettings::default());

        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let mut emitter = ClientEventEmitter::new(tx, cancel.clone());
        cancel.cancel();

        let result = agent.run(ask("hello"), &mut emitter, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn system_prompt_is_inserted_once() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            content_turn("hi"),
            content_turn("hi again"),
        ]));
        let (agent, _) = agent(&provider, default_registry(), AgentSettings::default());

        collect(Arc::clone(&agent).run_stream(ask("hello there"))).await;
        let own_prompt = ChatRequest::new(vec![
            Message::system("You are terse."),
            Message::user("hello there"),
        ]);
        collect(agent.run_stream(own_prompt)).await;

        let requests = provider.requests();
        let first = &requests[0].messages;
        assert_eq!(first[0].role, Role::System);
        assert!(first[0].content.contains("calculate"));
        assert_eq!(first.iter().filter(|m| m.role == Role::System).count(), 1);

        let second = &requests[1].messages;
        assert_eq!(second.iter().filter(|m| m.role == Role::System).count(), 1);
        assert_eq!(second[0].content, "You are terse.");
        assert_eq!(requests[0].tool_choice, "auto");
        assert_eq!(requests[0].tools.len(), 5);
    }

    #[test]
    fn dedupe_keeps_first_occurrence() {
        let calls = dedupe(vec![
            ToolCallRequest::new("a", 0, "calculate", json!({"expression": "1+1"})),
            ToolCallRequest::new("b", 1, "getCurrentTime", json!({})),
            ToolCallRequest::new("a", 2, "calculate", json!({"expression": "2+2"})),
        ]);
        let ids: Vec<(&str, u32)> = calls.iter().map(|c| (c.id.as_str(), c.index)).collect();
        assert_eq!(ids, vec![("a", 0), ("b", 1)]);
    }

    #[test]
    fn executed_ids_are_skipped() {
        let executed: HashSet<String> = ["a".to_string()].into_iter().collect();
        let calls = skip_executed(
            vec![
                ToolCallRequest::new("a", 0, "calculate", json!({"expression": "1+1"})),
                ToolCallRequest::new("b", 1, "getCurrentTime", json!({})),
            ],
            &executed,
        );
        let ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.agent.max_iterations = 3;
        config.agent.continue_after_tools = true;
        config.upstream.timeout_secs = 5;
        let settings = AgentSettings::from_config(&config);
        assert_eq!(settings.max_iterations, 3);
        assert!(settings.continue_after_tools);
        assert_eq!(settings.upstream_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_tool_attempts, 2);
    }
}
