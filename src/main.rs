//! echo-chamber: a framed-message TCP echo server
//!
//! Accepts connections and echoes every message unit straight back to
//! the peer. Units are length-prefixed (`<length>\r\n<payload>`), and
//! each connection runs on its own task so a stalled peer cannot hold
//! up the others.
//!
//! Features:
//! - Discrete message units over a plain TCP stream
//! - Peer disconnection surfaced as a distinct, expected condition
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod channel;
mod config;
mod echo;
mod error;
mod frame;
mod server;

use config::Config;
use error::ServerError;
use server::StreamServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        max_connections = config.max_connections,
        max_unit_size = config.max_unit_size,
        "Starting echo-chamber server"
    );

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(config))?;
    Ok(())
}

async fn run(config: Config) -> Result<(), ServerError> {
    let server = StreamServer::bind(&config).await?;

    // Stop accepting on Ctrl-C; connections already being served
    // finish on their own.
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.shutdown();
        }
    });

    server.run(echo::echo_connection).await
}
