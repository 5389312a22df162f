use std::sync::Arc;

use clap::Parser;
use tracing::info;

mod cli;
mod config;
mod metrics_log;

use modelgate_core::{Engine, UpstreamClientConfig, WreqUpstreamClient};
use modelgate_router::{AppState, router};

use crate::cli::Cli;
use crate::metrics_log::LogMetricsSink;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("modelgate failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = config::load(&cli.config)?;

    let registry = Arc::new(config::build_registry(&file)?);
    info!(
        providers = registry.provider_names().len(),
        default_provider = %registry.default_provider(),
        client_key_required = file.api_key.is_some(),
        "configuration loaded"
    );

    let client = Arc::new(WreqUpstreamClient::new(UpstreamClientConfig::default())?);
    let engine = Arc::new(Engine::new(registry, client, Arc::new(LogMetricsSink)));

    let state = AppState {
        engine,
        gateway_key: file.api_key.clone(),
    };
    let app = router(state);

    let host = cli.host.unwrap_or(file.host);
    let port = cli.port.unwrap_or(file.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutting down");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("modelgate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
