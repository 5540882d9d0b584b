//! Guarded tool execution: bounded attempts with self-correction.
//!
//! Per call: `Pending → Executing → Succeeded`, or
//! `Executing → Failed → Correcting → Executing | Exhausted`.
//! Failures never escape: every call resolves to a [`ToolResult`], either
//! the tool output or a structured failure payload.

use agentwire_core::error::{Error, ToolError};
use agentwire_core::tool::{ToolCallRequest, ToolRegistry, ToolResult};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{info, warn};

use crate::correction::CorrectionEngine;
use crate::stream_event::ClientEventEmitter;
use crate::synthesis::observation_summary;

pub const EXHAUSTED_SUGGESTION: &str =
    "The tool is temporarily unavailable; please try again later or rephrase the question.";

#[derive(Debug)]
enum CallState {
    Pending,
    Executing { attempt: u32 },
    Failed { attempt: u32, error: ToolError },
    Correcting { attempt: u32, error: ToolError },
    Succeeded(Value),
    Exhausted { attempts: u32, error: ToolError },
}

pub struct ToolExecutor<'a> {
    tools: &'a ToolRegistry,
    corrections: &'a CorrectionEngine,
    max_attempts: u32,
    timeout: Duration,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(
        tools: &'a ToolRegistry,
        corrections: &'a CorrectionEngine,
        max_attempts: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            tools,
            corrections,
            max_attempts: max_attempts.max(1),
            timeout,
        }
    }

    /// Run one call to completion, narrating each step on `emitter`.
    ///
    /// The only error returned is [`Error::Cancelled`] when the client is gone.
    pub async fn execute(
        &self,
        call: &ToolCallRequest,
        emitter: &mut ClientEventEmitter,
    ) -> Result<ToolResult, Error> {
        let mut arguments = match call.parse_arguments() {
            Ok(args) => args,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Unparseable tool arguments");
                emitter
                    .thought(&format!(
                        "❌ Could not parse the arguments for `{}`: {e}\nContinuing with empty arguments.",
                        call.name
                    ))
                    .await?;
                json!({})
            }
        };

        let mut state = CallState::Pending;
        loop {
            state = match state {
                CallState::Pending => CallState::Executing { attempt: 1 },

                CallState::Executing { attempt } => {
                    info!(tool = %call.name, id = %call.id, attempt, "Dispatching tool call");
                    emitter.action(&call.name, &arguments).await?;
                    match self.run_once(&call.name, arguments.clone()).await {
                        Ok(output) => CallState::Succeeded(output),
                        Err(error) => {
                            warn!(tool = %call.name, attempt, error = %error, "Tool attempt failed");
                            CallState::Failed { attempt, error }
                        }
                    }
                }

                CallState::Failed { attempt, error } if attempt < self.max_attempts => {
                    CallState::Correcting { attempt, error }
                }
                CallState::Failed { attempt, error } => CallState::Exhausted {
                    attempts: attempt,
                    error,
                },

                CallState::Correcting { attempt, error } => {
                    let correction =
                        self.corrections
                            .correct(&call.name, &arguments, &error.to_string());
                    emitter
                        .thought(&format!(
                            "⚠️ Tool execution failed (attempt {attempt}/{})\nError: {error}\nAnalysis: {}\nStrategy: {}",
                            self.max_attempts, correction.analysis, correction.strategy
                        ))
                        .await?;
                    if correction.can_retry {
                        arguments = correction.corrected_arguments;
                        CallState::Executing {
                            attempt: attempt + 1,
                        }
                    } else {
                        CallState::Exhausted {
                            attempts: attempt,
                            error,
                        }
                    }
                }

                CallState::Succeeded(output) => {
                    emitter
                        .observation(&observation_summary(&call.name, &output))
                        .await?;
                    return Ok(ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        success: true,
                        content: output,
                    });
                }

                CallState::Exhausted { attempts, error } => {
                    let noun = if attempts == 1 { "attempt" } else { "attempts" };
                    emitter
                        .thought(&format!(
                            "❌ Tool {} failed after {attempts} {noun}\nFinal error: {error}\nThe answer will be composed without it.",
                            call.name
                        ))
                        .await?;
                    return Ok(ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        success: false,
                        content: json!({
                            "success": false,
                            "error": error.to_string(),
                            "attempts": attempts,
                            "suggestion": EXHAUSTED_SUGGESTION,
                        }),
                    });
                }
            };
        }
    }

    async fn run_once(&self, name: &str, arguments: Value) -> Result<Value, ToolError> {
        match tokio::time::timeout(self.timeout, self.tools.execute(name, arguments)).await {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout {
                tool_name: name.to_string(),
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }
}
