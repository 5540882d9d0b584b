//! `agentwire chat` — run one request and print its event stream.

use std::sync::Arc;

use agentwire_agent::ClientEvent;
use agentwire_config::AppConfig;
use agentwire_core::message::{ChatRequest, Message};

pub async fn run(message: String, user: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set AGENTWIRE_API_KEY (or XUNFEI_API_KEY / OPENAI_API_KEY),");
        eprintln!("  or add upstream.api_key to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let agent = Arc::new(agentwire_gateway::build_agent(&config)?);
    let mut request = ChatRequest::new(vec![Message::user(message)]);
    request.user_id = user;

    let mut rx = agent.run_stream(request);
    while let Some(event) = rx.recv().await {
        match render(&event) {
            Some(text) if matches!(event, ClientEvent::Error { .. }) => eprintln!("{text}"),
            Some(text) => println!("{text}"),
            None => {}
        }
    }

    Ok(())
}

/// Terminal rendering of one event; `None` for events with nothing to show.
pub(crate) fn render(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Reasoning { content } | ClientEvent::FinalAnswer { content } => {
            Some(content.trim_end().to_string())
        }
        ClientEvent::Passthrough(raw) => raw["choices"][0]["delta"]["content"]
            .as_str()
            .filter(|text| !text.is_empty())
            .map(String::from),
        ClientEvent::Error { code, message } => Some(match code {
            Some(code) => format!("❌ [{code}] {message}"),
            None => format!("❌ {message}"),
        }),
        ClientEvent::Done => None,
    }
}
