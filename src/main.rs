use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use llm_gateway::config::GatewayConfig;
use llm_gateway::generator::{GeminiClient, ResponseGenerator};
use llm_gateway::http::{AppState, HttpServer};
use llm_gateway::ratelimit::{RateLimiter, RedisStore};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "llm-gateway", version, about)]
struct Args {
    /// Optional YAML configuration file; environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }

    info!("Starting LLM Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    info!(
        listen_addr = %config.listen_addr,
        environment = %config.environment,
        "Configuration loaded"
    );

    let store = Arc::new(RedisStore::open(&config.redis_url, config.redis_timeout())?);
    let limiter = Arc::new(RateLimiter::new(store, config.limits(), config.probe_interval).await);
    info!(mode = ?limiter.mode(), "Rate limiter initialized");

    let generator: Option<Arc<dyn ResponseGenerator>> = match &config.gemini_api_key {
        Some(key) if !key.trim().is_empty() => {
            let client = GeminiClient::new(key.clone(), config.gemini_model.clone())?;
            info!(model = %client.model(), "Response generator configured");
            Some(Arc::new(client))
        }
        _ => {
            warn!("GEMINI_API_KEY not set, chat endpoint disabled");
            None
        }
    };

    let addr = config.listen_addr;
    let state = AppState::new(limiter, generator, Arc::new(config));

    HttpServer::new(addr, state)
        .serve_with_shutdown(shutdown_signal())
        .await?;

    info!("LLM Gateway stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
