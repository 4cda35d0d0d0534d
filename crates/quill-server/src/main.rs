//! Quill server binary
//!
//! Serves the runtime over one WebSocket per session.

mod ws;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::routing::get;
use axum::Router;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use quill_core::RuntimeConfig;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Agentic chat runtime speaking markdown over WebSocket")]
#[command(version)]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "8787")]
    port: u16,

    /// Path to a JSON runtime configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the model name from the configuration
    #[arg(long)]
    model: Option<String>,
}

fn init_tracing(config: &RuntimeConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "quill_core={0},quill_server={0}",
            config.logging.level
        ))
    });
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(model) = args.model {
        config.model.model = model;
    }

    init_tracing(&config)?;
    info!(model = %config.model.model, max_turns = config.max_turns, "starting quill");

    let state = ws::AppState::new(config);
    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}
