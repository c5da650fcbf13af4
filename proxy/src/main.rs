use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use ollama_proxy::auth::Authenticator;
use ollama_proxy::config::Config;
use ollama_proxy::{app, logging, AppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    println!("ollama-proxy {}", VERSION);
}

fn print_usage() {
    eprintln!("Usage: ollama-proxy [--config <path>] [--version]");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.iter().any(|a| a == "--version" || a == "-V") {
        print_version();
        return Ok(());
    }
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }
    let config_path = args
        .iter()
        .position(|a| a == "--config" || a == "-c")
        .map(|i| args.get(i + 1).cloned().ok_or("--config requires a path"))
        .transpose()?;

    // Load configuration
    let config = Config::load(config_path.as_deref())
        .map_err(|e| format!("Failed to load configuration: {}", e))?;

    logging::init(&config.logging.level);
    tracing::info!("Starting Ollama Proxy {}", VERSION);

    if config.backends.is_empty() {
        tracing::warn!("No backends configured, every request will fail");
    }

    let auth = Authenticator::from_config(&config.auth)?;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, auth)?);

    let app = app(state);

    tracing::info!("Listening on {}", addr);
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
