//! HTTP gateway for agentwire.
//!
//! Exposes the chat endpoint as a Server-Sent Events stream plus a health
//! check. Built on Axum; every request gets its own agent run.

pub mod api;

use axum::extract::DefaultBodyLimit;
use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use agentwire_agent::{AgentLoop, AgentSettings};
use agentwire_config::{AppConfig, HistoryBackend, HistoryConfig};
use agentwire_core::error::{Error, HistoryError};
use agentwire_core::history::HistorySink;
use agentwire_memory::{FileHistory, InMemoryHistory, NoopHistory};
use agentwire_providers::OpenAiCompatProvider;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub config: AppConfig,
    pub agent: Arc<AgentLoop>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
///
/// Layers: CORS for any origin, a request body limit of
/// `gateway.max_body_bytes`, and HTTP trace logging.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);
    let body_limit = state.config.gateway.max_body_bytes;

    Router::new()
        .route("/api/chat", post(api::chat_handler))
        .route("/health", get(api::health_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the history sink selected by `config.backend`.
pub fn build_history(config: &HistoryConfig) -> Result<Arc<dyn HistorySink>, HistoryError> {
    Ok(match config.backend {
        HistoryBackend::File => {
            let dir = config.dir();
            info!(dir = %dir.display(), "Using file history");
            Arc::new(FileHistory::open(dir, config.max_messages)?)
        }
        HistoryBackend::Memory => Arc::new(InMemoryHistory::new(config.max_messages)),
        HistoryBackend::None => Arc::new(NoopHistory),
    })
}

/// Wire provider, tools and history from `config` into an agent.
pub fn build_agent(config: &AppConfig) -> Result<AgentLoop, Error> {
    let Some(api_key) = config.upstream.api_key.clone() else {
        return Err(Error::Config {
            message: "no upstream API key; set upstream.api_key or AGENTWIRE_API_KEY".into(),
        });
    };
    let provider = Arc::new(OpenAiCompatProvider::new(
        "upstream",
        &config.upstream.base_url,
        api_key,
    ));
    let tools = Arc::new(agentwire_tools::default_registry());
    let history = build_history(&config.history)?;

    Ok(AgentLoop::new(
        provider,
        tools,
        history,
        AgentSettings::from_config(config),
    ))
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    if config.agent.continue_after_tools {
        warn!("Multi-round mode enabled: tool results are fed back to the model");
    }

    let agent = Arc::new(build_agent(&config)?);
    let app = build_router(Arc::new(GatewayState { config, agent }));

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
