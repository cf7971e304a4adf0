//! Standalone chat server.
//!
//! Usage: `chat-server [config.toml]`. Without a file argument the
//! configuration comes from `CHAT_TRANSPORT_*` environment variables.

use chat_transport::utils::logging::init_logging;
use chat_transport::{ChatConfig, ChatServer, Result};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!(error = %e, "Chat server failed");
        eprintln!("chat-server: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ChatConfig::from_file(path)?,
        None => ChatConfig::from_env()?,
    };
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let server = ChatServer::bind(config).await?;
    server.start().await?;
    info!(address = %server.local_addr(), "Press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
    }

    info!("Received CTRL+C signal, shutting down");
    server.shutdown().await
}
