use anyhow::Result;
use clap::Parser;
use crime_proxy::config::Config;
use crime_proxy::selector::Mode;
use crime_proxy::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Validating, rate-limited proxy in front of a crime-data provider
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Pin the backend mode: mock, staging or prod (overrides CRIME_API_MODE)
    #[arg(long)]
    mode: Option<String>,

    /// Default log level when RUST_LOG is unset (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();

    // Load configuration from environment
    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("crime_proxy={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting crime proxy");
    tracing::info!(
        "Configuration: bind_addr={}, upstream={}, window_ms={}, max_requests={}",
        config.bind_addr,
        config.upstream_base_url,
        config.rate_limit_window_ms,
        config.rate_limit_max_requests
    );

    let mode_override = args.mode.as_deref().map(Mode::parse);

    // Create and run the server
    let server = Server::new(config, mode_override)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}
