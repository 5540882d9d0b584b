//! OpenAI-compatible streaming provider.
//!
//! Works with any endpoint exposing an OpenAI-style `/chat/completions`
//! route with `stream: true` (Xunfei MaaS, OpenAI, OpenRouter, vLLM, Ollama).
//! The response body is decoded by [`SseParser`] on a background task and
//! delivered as [`UpstreamEvent`]s.

use agentwire_core::error::ProviderError;
use agentwire_core::message::{Message, Role};
use agentwire_core::provider::*;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sse::SseParser;

/// An OpenAI-compatible streaming provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    ///
    /// No overall request timeout is set on the client: a streamed body
    /// may legitimately outlive it. The agent loop bounds each call.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Xunfei MaaS endpoint (convenience constructor).
    pub fn xunfei(api_key: impl Into<String>) -> Self {
        Self::new("xunfei", "https://maas-api.cn-huabei-1.xf-yun.com/v1", api_key)
    }

    /// Create an Ollama provider (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::new(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::System => "system",
                    Role::Tool => "tool",
                },
                content: m.content.clone(),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function",
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments.clone(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function",
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": request.stream,
        });

        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
            body["tool_choice"] = serde_json::json!(request.tool_choice);
        }

        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<UpstreamReceiver, ProviderError> {
        let body = Self::request_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending streaming request"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Provider streaming error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(response.bytes_stream(), tx));
        Ok(rx)
    }
}

/// Decode a byte stream into events until the transport ends or the
/// receiver is dropped. Dropping the stream closes the HTTP response.
pub(crate) async fn pump<S, B, E>(
    byte_stream: S,
    tx: mpsc::Sender<std::result::Result<UpstreamEvent, ProviderError>>,
) where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut parser = SseParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let bytes = match chunk {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                    .await;
                return;
            }
        };

        for event in parser.feed(bytes.as_ref()) {
            if tx.send(Ok(event)).await.is_err() {
                debug!("Upstream receiver dropped, aborting stream");
                return;
            }
        }

        if tx.is_closed() {
            debug!("Upstream receiver dropped, aborting stream");
            return;
        }
    }

    for event in parser.finish() {
        if tx.send(Ok(event)).await.is_err() {
            return;
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiToolCall {
    id: String,
    r#type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ApiToolDefinition {
    r#type: &'static str,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentwire_core::message::MessageToolCall;

    #[test]
    fn xunfei_constructor() {
        let provider = OpenAiCompatProvider::xunfei("key");
        assert_eq!(provider.name(), "xunfei");
        assert_eq!(
            provider.endpoint(),
            "https://maas-api.cn-huabei-1.xf-yun.com/v1/chat/completions"
        );
    }

    #[test]
    fn ollama_constructor() {
        let provider = OpenAiCompatProvider::ollama(Some("http://localhost:11434/v1/"));
        assert_eq!(provider.name(), "ollama");
        assert_eq!(provider.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatProvider::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant_tool_calls(vec![MessageToolCall {
            id: "call_1".into(),
            name: "calculate".into(),
            arguments: r#"{"expression":"1+1"}"#.into(),
        }]);
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].function.name, "calculate");
        assert_eq!(tc[0].r#type, "function");
    }

    #[test]
    fn message_conversion_tool_response() {
        let msg = Message::tool_result("call_1", "calculate", "{\"result\":2}");
        let api_msgs = OpenAiCompatProvider::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(api_msgs[0].name.as_deref(), Some("calculate"));
    }

    #[test]
    fn request_body_shape() {
        let tools = vec![ToolDefinition {
            name: "calculate".into(),
            description: "Evaluate arithmetic".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let request = ProviderRequest::streaming("xop3qwen1b7", vec![Message::user("1+1")], tools);
        let body = OpenAiCompatProvider::request_body(&request);
        assert_eq!(body["model"], "xop3qwen1b7");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "calculate");
    }

    #[test]
    fn request_body_without_tools_omits_tool_choice() {
        let request = ProviderRequest::streaming("m", vec![Message::user("hi")], vec![]);
        let body = OpenAiCompatProvider::request_body(&request);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
    }

    #[tokio::test]
    async fn pump_decodes_split_chunks() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"con".to_vec()),
            Ok(b"tent\":\"hi\"}}]}\n\nda".to_vec()),
            Ok(b"ta: [DONE]\n\n".to_vec()),
        ];
        let (tx, mut rx) = mpsc::channel(16);
        pump(futures::stream::iter(chunks), tx).await;

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event.unwrap());
        }
        assert!(matches!(events[0], UpstreamEvent::Raw(_)));
        assert_eq!(events[1], UpstreamEvent::ContentFragment("hi".into()));
        assert_eq!(events[2], UpstreamEvent::Terminal);
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn pump_reports_transport_failure() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> =
            vec![Ok(b"data: {\"choices\":[]}\n".to_vec()), Err("connection reset".into())];
        let (tx, mut rx) = mpsc::channel(16);
        pump(futures::stream::iter(chunks), tx).await;

        assert!(rx.recv().await.unwrap().is_ok());
        let err = rx.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, ProviderError::StreamInterrupted(_)));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn pump_stops_when_receiver_dropped() {
        let chunks: Vec<std::result::Result<Vec<u8>, String>> = (0..100)
            .map(|_| Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n".to_vec()))
            .collect();
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        // Returns instead of blocking on a full channel.
        pump(futures::stream::iter(chunks), tx).await;
    }
}
