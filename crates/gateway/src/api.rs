//! Request handlers.
//!
//! - `POST /api/chat` — run the agent, stream `ClientEvent`s as SSE
//! - `GET  /health`   — liveness check

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderName, StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, Sse},
    },
};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};

use agentwire_core::message::ChatRequest;

use crate::SharedState;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: impl Into<String>) -> ApiError {
    let error = error.into();
    warn!(error = %error, "Rejected chat request");
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error }))
}

/// `POST /api/chat`: run one agent request and stream its events.
///
/// The body is parsed here rather than by the `Json` extractor so malformed
/// input gets the same `{"error": ...}` shape as other rejections.
pub async fn chat_handler(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: ChatRequest = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("Invalid request body: {e}")))?;
    if request.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }

    info!(
        user_id = %request.user_id(),
        messages = request.messages.len(),
        "POST /api/chat"
    );

    let rx = Arc::clone(&state.agent).run_stream(request);
    let stream = ReceiverStream::new(rx)
        .map(|event| Ok::<_, Infallible>(SseEvent::default().data(event.to_sse_data())));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Sse::new(stream),
    ))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub version: &'static str,
}

pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Agent API is running",
        version: env!("CARGO_PKG_VERSION"),
    })
}
