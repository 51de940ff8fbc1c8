use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pepmart_contracts::catalog::StyleCatalog;
use pepmart_contracts::features::FeatureThresholds;
use pepmart_engine::providers::build_registry;
use pepmart_engine::Pipeline;
use pepmart_server::config::ServerArgs;
use pepmart_server::{build_app, AppState};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_LOG_FILTER: &str = "pepmart_server=info,pepmart_engine=info,tower_http=info";

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("pepmart-server error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServerArgs::parse();
    let catalog = StyleCatalog::load().context("failed loading style catalog")?;
    let specs = args.provider_specs()?;
    let registry = build_registry(&specs).context("invalid provider chain")?;
    let styles = catalog.styles.len();
    let pipeline = Arc::new(Pipeline::new(
        catalog,
        FeatureThresholds::default(),
        registry,
        args.pipeline_config(),
    ));
    tracing::info!(
        providers = ?pipeline.providers().list(),
        workers = args.workers,
        styles,
        "pipeline configured"
    );

    let state = AppState::new(Arc::clone(&pipeline), args.max_upload_bytes);
    let warm_state = state.clone();
    tokio::spawn(async move {
        for (name, availability) in warm_state.pipeline().warm_up().await {
            tracing::info!(provider = %name, ?availability, "provider probed");
        }
        warm_state.mark_ready();
    });

    let bind = args.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed binding {bind}"))?;
    tracing::info!(address = %bind, "pepmart-server listening");

    axum::serve(listener, build_app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")?;
    tracing::info!("pepmart-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        () = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
