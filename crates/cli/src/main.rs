//! agentwire CLI — the main entry point.
//!
//! Commands:
//! - `serve`    — Start the HTTP/SSE gateway
//! - `chat`     — Run one request and print its event stream
//! - `history`  — Show a user's stored history and learned preferences
//! - `config`   — Print the default configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "agentwire",
    about = "agentwire — streaming ReAct agent server",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Send one message to the agent and print the event stream
    Chat {
        /// The message to send
        #[arg(short, long)]
        message: String,

        /// User id for history and preferences
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Show stored chat history for a user
    History {
        #[arg(short, long)]
        user: String,

        /// Number of most recent entries to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Chat { message, user } => commands::chat::run(message, user).await?,
        Commands::History { user, limit } => commands::history::run(&user, limit)?,
        Commands::Config => commands::config_cmd::show_default(),
    }

    Ok(())
}
