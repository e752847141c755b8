use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use sightcard_analyze::{backend_from_settings, Analyzer, ModelGateway};
use sightcard_server::api::{self, AppState};
use sightcard_server::config::{build_store, Cli};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_target(false)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    if !settings.ai_configured() {
        warn!(
            provider = %settings.provider,
            "model credentials look incomplete; analysis requests may fail"
        );
    }
    info!(
        provider = %settings.provider,
        model = %settings.model,
        project = %settings.project_id,
        location = %settings.location,
        "starting analysis service"
    );

    // The backend client and the store are built once and shared by every request.
    let backend = backend_from_settings(&settings).context("initialize model backend")?;
    let gateway = ModelGateway::new(backend, &settings.model);
    let analyzer = Analyzer::new(build_store(&settings), gateway);
    info!(model = analyzer.model(), "analysis pipeline ready");
    let app = api::router(AppState::new(analyzer));

    let addr: SocketAddr = cli
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {}", cli.listen))?;
    info!("listening on http://{addr}");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    info!("shutdown requested");
}
