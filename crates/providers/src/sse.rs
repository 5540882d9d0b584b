//! Incremental decoder for the upstream `text/event-stream` body.
//!
//! Bytes are buffered until a full line is available, so a JSON payload
//! (or a multi-byte UTF-8 sequence) split across network chunks is decoded
//! exactly as if it had arrived in one piece. The trailing partial line is
//! always kept for the next chunk.

use agentwire_core::provider::{ToolCallFragment, UpstreamEvent};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Open,
    /// `[DONE]` seen; later lines are ignored.
    Done,
    /// An error payload was emitted; later lines are ignored.
    Failed,
}

/// Line-buffered SSE decoder producing [`UpstreamEvent`]s.
#[derive(Debug)]
pub struct SseParser {
    buffer: Vec<u8>,
    state: ParserState,
}

impl SseParser {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: ParserState::Open,
        }
    }

    /// Whether a terminal or error event has already been produced.
    pub fn is_closed(&self) -> bool {
        self.state != ParserState::Open
    }

    /// Feed one transport chunk and return the events completed by it.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        if self.is_closed() {
            return events;
        }

        self.buffer.extend_from_slice(bytes);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = self.buffer[start..end].to_vec();
            start = end + 1;
            self.process_line(&line, &mut events);
            if self.is_closed() {
                self.buffer.clear();
                return events;
            }
        }
        self.buffer.drain(..start);
        events
    }

    /// Signal end of transport. Decodes any unterminated last line and
    /// emits an implicit [`UpstreamEvent::Terminal`] if none was seen.
    pub fn finish(&mut self) -> Vec<UpstreamEvent> {
        let mut events = Vec::new();
        if !self.is_closed() && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.process_line(&line, &mut events);
        }
        if self.state == ParserState::Open {
            debug!("Upstream closed without [DONE], treating as terminal");
            self.state = ParserState::Done;
            events.push(UpstreamEvent::Terminal);
        }
        events
    }

    fn process_line(&mut self, raw: &[u8], events: &mut Vec<UpstreamEvent>) {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Dropping SSE line with invalid UTF-8");
                return;
            }
        };

        // Blank separators, comments and non-data fields carry nothing for us.
        if line.trim().is_empty() || line.starts_with(':') {
            return;
        }
        let Some(data) = line.strip_prefix("data:") else {
            trace!(line, "Ignoring non-data SSE field");
            return;
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.state = ParserState::Done;
            events.push(UpstreamEvent::Terminal);
            return;
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => {
                warn!(data, "Dropping non-object SSE payload");
                return;
            }
            Err(e) => {
                warn!(data, error = %e, "Dropping unparseable SSE payload");
                return;
            }
        };

        if let Some(error) = upstream_error(&payload) {
            self.state = ParserState::Failed;
            events.push(error);
            return;
        }

        decode_chunk(payload, events);
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an `error` field (object or bare string) to an error event.
fn upstream_error(payload: &Value) -> Option<UpstreamEvent> {
    match payload.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(UpstreamEvent::Error {
            code: None,
            message: message.clone(),
        }),
        Value::Object(obj) => {
            let code = obj.get("code").and_then(|c| match c {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });
            let message = obj
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("upstream returned an error")
                .to_string();
            Some(UpstreamEvent::Error { code, message })
        }
        other => Some(UpstreamEvent::Error {
            code: None,
            message: other.to_string(),
        }),
    }
}

/// Emit `Raw`, then content and tool-call fragments for one chunk.
fn decode_chunk(payload: Value, events: &mut Vec<UpstreamEvent>) {
    let chunk = match StreamResponse::deserialize(&payload) {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!(error = %e, "Dropping SSE payload with unexpected shape");
            return;
        }
    };
    events.push(UpstreamEvent::Raw(payload));

    let Some(choice) = chunk.choices.into_iter().next() else {
        return;
    };

    if let Some(reason) = &choice.finish_reason {
        debug!(finish_reason = %reason, "Upstream choice finished");
    }

    if let Some(delta) = choice.delta {
        if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
            trace!(content = %content, "Content fragment");
            events.push(UpstreamEvent::ContentFragment(content));
        }
        for call in delta.tool_calls.unwrap_or_default() {
            events.push(UpstreamEvent::ToolCallFragment(call.into_fragment(0)));
        }
    }

    // Non-streaming shape: complete calls on `message`.
    if let Some(message) = choice.message {
        for (position, call) in message.tool_calls.unwrap_or_default().into_iter().enumerate() {
            events.push(UpstreamEvent::ToolCallFragment(
                call.into_fragment(position as u32),
            ));
        }
    }
}

// --- Streaming chunk types (internal) ---

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    #[serde(default)]
    message: Option<StreamDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta; arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl StreamToolCallDelta {
    fn into_fragment(self, default_index: u32) -> ToolCallFragment {
        let (name, arguments) = match self.function {
            Some(f) => (f.name, f.arguments),
            None => (None, None),
        };
        ToolCallFragment {
            index: self.index.unwrap_or(default_index),
            id: self.id.filter(|id| !id.is_empty()),
            name: name.filter(|n| !n.is_empty()),
            arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTENT_CHUNK: &str = r#"{"id":"c1","object":"chat.completion.chunk","choices":[{"index":0,"delta":{"content":"你好, world"},"finish_reason":null}]}"#;
    const TOOL_CHUNK: &str = r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_abc","type":"function","function":{"name":"calculate","arguments":"{\"expr"}}]}}]}"#;

    fn sse(payloads: &[&str]) -> Vec<u8> {
        payloads
            .iter()
            .map(|p| format!("data: {p}\n\n"))
            .collect::<String>()
            .into_bytes()
    }

    fn decode_all(chunks: &[&[u8]]) -> Vec<UpstreamEvent> {
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for chunk in chunks {
            events.extend(parser.feed(chunk));
        }
        events.extend(parser.finish());
        events
    }

    #[test]
    fn parse_stream_content_delta() {
        let events = decode_all(&[&sse(&[CONTENT_CHUNK, "[DONE]"])]);
        assert!(matches!(events[0], UpstreamEvent::Raw(_)));
        assert_eq!(events[1], UpstreamEvent::ContentFragment("你好, world".into()));
        assert_eq!(events[2], UpstreamEvent::Terminal);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn parse_stream_tool_call_delta() {
        let events = decode_all(&[&sse(&[TOOL_CHUNK])]);
        let fragment = events
            .iter()
            .find_map(|e| match e {
                UpstreamEvent::ToolCallFragment(f) => Some(f.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(fragment.index, 0);
        assert_eq!(fragment.id.as_deref(), Some("call_abc"));
        assert_eq!(fragment.name.as_deref(), Some("calculate"));
        assert_eq!(fragment.arguments.as_deref(), Some("{\"expr"));
    }

    #[test]
    fn split_at_every_byte_boundary_decodes_identically() {
        let body = sse(&[CONTENT_CHUNK, TOOL_CHUNK, "[DONE]"]);
        let whole = decode_all(&[&body]);

        for split in 0..=body.len() {
            let (a, b) = body.split_at(split);
            assert_eq!(decode_all(&[a, b]), whole, "split at byte {split}");
        }
    }

    #[test]
    fn one_byte_chunks_decode_identically() {
        let body = sse(&[CONTENT_CHUNK, TOOL_CHUNK, "[DONE]"]);
        let whole = decode_all(&[&body]);
        let bytes: Vec<&[u8]> = body.chunks(1).collect();
        assert_eq!(decode_all(&bytes), whole);
    }

    #[test]
    fn done_stops_emission() {
        let body = sse(&["[DONE]", CONTENT_CHUNK]);
        let mut parser = SseParser::new();
        let events = parser.feed(&body);
        assert_eq!(events, vec![UpstreamEvent::Terminal]);
        assert!(parser.feed(&sse(&[CONTENT_CHUNK])).is_empty());
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn malformed_payload_is_skipped() {
        let body = sse(&["{not json", CONTENT_CHUNK, "[DONE]"]);
        let events = decode_all(&[&body]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1], UpstreamEvent::ContentFragment("你好, world".into()));
    }

    #[test]
    fn error_object_stops_parser() {
        let body = sse(&[
            r#"{"error":{"code":10013,"message":"input blocked"}}"#,
            CONTENT_CHUNK,
        ]);
        let mut parser = SseParser::new();
        let events = parser.feed(&body);
        assert_eq!(
            events,
            vec![UpstreamEvent::Error {
                code: Some("10013".into()),
                message: "input blocked".into()
            }]
        );
        assert!(parser.finish().is_empty());
    }

    #[test]
    fn error_string_is_reported() {
        let events = decode_all(&[&sse(&[r#"{"error":"quota exceeded"}"#])]);
        assert_eq!(
            events[0],
            UpstreamEvent::Error {
                code: None,
                message: "quota exceeded".into()
            }
        );
    }

    #[test]
    fn missing_done_yields_implicit_terminal() {
        let events = decode_all(&[&sse(&[CONTENT_CHUNK])]);
        assert_eq!(events.last(), Some(&UpstreamEvent::Terminal));
    }

    #[test]
    fn unterminated_last_line_is_decoded_on_finish() {
        let body = format!("data: {CONTENT_CHUNK}");
        let mut parser = SseParser::new();
        assert!(parser.feed(body.as_bytes()).is_empty());
        let events = parser.finish();
        assert_eq!(events[1], UpstreamEvent::ContentFragment("你好, world".into()));
        assert_eq!(events[2], UpstreamEvent::Terminal);
    }

    #[test]
    fn crlf_comments_and_unspaced_prefix() {
        let body = format!(": keep-alive\r\nevent: message\r\ndata:{CONTENT_CHUNK}\r\n\r\ndata:[DONE]\r\n");
        let events = decode_all(&[body.as_bytes()]);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], UpstreamEvent::Terminal);
    }

    #[test]
    fn empty_delta_yields_only_raw() {
        let events = decode_all(&[&sse(&[
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""},"finish_reason":"stop"}]}"#,
        ])]);
        assert!(matches!(events[0], UpstreamEvent::Raw(_)));
        assert_eq!(events[1], UpstreamEvent::Terminal);
    }

    #[test]
    fn complete_message_tool_calls_are_fragments() {
        let events = decode_all(&[&sse(&[
            r#"{"choices":[{"message":{"tool_calls":[{"id":"a","function":{"name":"getCurrentTime","arguments":"{}"}},{"id":"b","function":{"name":"searchWeb","arguments":"{\"query\":\"rust\"}"}}]}}]}"#,
        ])]);
        let fragments: Vec<_> = events
            .into_iter()
            .filter_map(|e| match e {
                UpstreamEvent::ToolCallFragment(f) => Some(f),
                _ => None,
            })
            .collect();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].index, 1);
        assert_eq!(fragments[1].name.as_deref(), Some("searchWeb"));
    }
}
