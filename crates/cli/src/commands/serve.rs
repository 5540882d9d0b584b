//! `agentwire serve` — Start the HTTP API server.

use agentwire_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("agentwire gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Upstream:  {} ({})", config.upstream.base_url, config.upstream.model);
    println!("   History:   {:?}", config.history.backend);

    agentwire_gateway::start(config).await?;

    Ok(())
}
