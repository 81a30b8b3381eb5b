pub mod api;
pub mod capture;
pub mod error;
pub mod models;
pub mod settings;
pub mod store;
pub mod utils;

#[cfg(test)]
mod tests;

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use log::info;

use capture::{CaptureOrchestrator, CaptureScheduler, ChromiumEngine};
use settings::Settings;
use store::SnapshotStore;

/// Builds the orchestrator wired to headless Chromium and the on-disk store.
pub fn build_orchestrator(settings: &Settings) -> Result<Arc<CaptureOrchestrator>> {
    let store = SnapshotStore::open(&settings.data_dir)
        .with_context(|| format!("failed to open data dir {}", settings.data_dir.display()))?;
    let engine = Arc::new(ChromiumEngine::from_settings(settings));
    Ok(Arc::new(CaptureOrchestrator::new(store, engine, settings)))
}

/// Serves the read API and keeps the capture scheduler ticking until Ctrl-C.
pub async fn run() -> Result<()> {
    utils::logging::init();

    let settings = Settings::load(None).context("failed to load settings")?;
    info!(
        "AQI relay starting: target {} (fragment {:?}), window {}s, timeout {}s",
        settings.target_url,
        settings.api_fragment,
        settings.throttle_window_secs,
        settings.capture_timeout_secs
    );

    let orchestrator = build_orchestrator(&settings)?;
    let app = api::router(orchestrator.store().clone(), &settings);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server running at http://localhost:{}", settings.port);

    let mut scheduler = CaptureScheduler::new(orchestrator, settings.throttle_window());
    scheduler.start()?;

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed");

    scheduler.stop().await?;
    info!("AQI relay stopped");
    served
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
