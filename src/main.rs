//! WebSocket Group Chat Server - Entry Point
//!
//! Loads configuration, starts the room and serves HTTP until Ctrl-C.

use tracing::info;
use tracing_subscriber::EnvFilter;

use chat_room::{ChatServer, ProviderRegistry, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_room=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_room=info")),
        )
        .init();

    // Defaults, then CHAT_* env vars, then the bind address argument
    let config = ServerConfig::from_env()?;
    info!(
        "Queue capacity {}, socket buffers {}/{}",
        config.queue_capacity, config.read_buffer_size, config.write_buffer_size
    );

    // Real identity providers are registered here by the deployment
    let providers = ProviderRegistry::new();
    if !config.dev_auth {
        info!("No identity providers configured; set CHAT_DEV_AUTH=1 for local sign-in");
    }

    let server = ChatServer::new(config, providers);
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("Chat server stopped");
    Ok(())
}
