use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jsonsync_core::SyncCoordinator;
use jsonsync_server::{create_router, AppState, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let log_filter = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "jsonsync_server={0},jsonsync_core={0},tower_http=info",
                    log_filter
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.into_config();
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        listen = %config.listen_addr(),
        "starting jsonsync server"
    );

    // Open the store and start watching it
    let coordinator = Arc::new(SyncCoordinator::open(config.sync_config())?);
    let watcher = coordinator.start()?;

    let state = AppState::new(coordinator.clone(), config.clone());
    let app = create_router(state);

    let listener = TcpListener::bind(config.listen_addr()).await?;
    tracing::info!(
        root = %coordinator.store().root().display(),
        "serving on {}",
        config.base_url()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    watcher.shutdown().await;
    tracing::info!("server shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl+c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received shutdown signal");
}
