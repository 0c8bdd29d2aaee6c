//! # proxlock-server
//!
//! HTTP server for the proxlock badge proximity lock.
//!
//! This binary provides:
//! - The proximity tracker on the BlueZ, simulated or no radio backend
//! - REST API and server-sent events for the lock state
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated badge
//! cargo run --package proxlock-server
//!
//! # On the kiosk host
//! cargo build --release --package proxlock-server --no-default-features --features bluetooth
//! PROXLOCK_ENV=production ./proxlock-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use anyhow::Context;
use proxlock_core::bluetooth::{self, RadioEvent, RadioRequest};
use proxlock_core::{tracker, Config, TrackerHandle};
use proxlock_server::state::{AppState, RadioBackend};
use proxlock_server::{api, logging};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging settings live in the configuration, so it loads first.
    let config_path = Config::default_path()?;
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    logging::init(&config.logging, logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting proxlock-server");
    info!(path = %config_path.display(), "Configuration loaded");

    let (tracker, radio) = start_tracker(&config).await?;
    info!(backend = radio.as_str(), "Radio backend ready");

    let listen_addr = config.server.listen_addr.clone();
    let state = AppState::new(config, config_path, tracker.clone(), radio);
    let app = api::create_router(state);

    let listener = TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("Failed to bind {listen_addr}"))?;
    info!("Listening on {}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = tracker.stop_tracking().await {
        warn!(error = %e, "Tracker already stopped");
    }
    info!("proxlock-server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

async fn start_tracker(config: &Config) -> anyhow::Result<(TrackerHandle, RadioBackend)> {
    let (handle, requests, events_tx, events_rx) = bluetooth::channel();
    let radio = serve_radio(config, requests, events_tx).await?;
    Ok((tracker::spawn(config, handle, events_rx), radio))
}

#[cfg(feature = "bluetooth")]
async fn serve_radio(
    _config: &Config,
    requests: mpsc::UnboundedReceiver<RadioRequest>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> anyhow::Result<RadioBackend> {
    let _backend = bluetooth::bluez::spawn(requests, events)
        .await
        .context("Failed to start BlueZ backend")?;
    Ok(RadioBackend::Bluez)
}

#[cfg(all(not(feature = "bluetooth"), feature = "mock-bluetooth"))]
#[allow(clippy::unused_async)]
async fn serve_radio(
    config: &Config,
    requests: mpsc::UnboundedReceiver<RadioRequest>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> anyhow::Result<RadioBackend> {
    use bluetooth::simulated::{self, BadgeProfile};
    use proxlock_core::PeerId;

    let mut profile = BadgeProfile {
        service: config.link.service_uuid,
        characteristic: config.link.characteristic_uuid,
        ..BadgeProfile::default()
    };
    if let Some(address) = &config.link.target_address {
        profile.address = PeerId::new(address.as_str());
    }
    simulated::spawn(profile, requests, events);
    Ok(RadioBackend::Simulated)
}

#[cfg(not(any(feature = "bluetooth", feature = "mock-bluetooth")))]
#[allow(clippy::unused_async)]
async fn serve_radio(
    _config: &Config,
    mut requests: mpsc::UnboundedReceiver<RadioRequest>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> anyhow::Result<RadioBackend> {
    warn!("Built without a radio backend; the adapter will stay off");
    tokio::spawn(async move {
        let _events = events;
        while let Some(request) = requests.recv().await {
            tracing::debug!(?request, "No radio backend, dropping request");
        }
    });
    Ok(RadioBackend::Detached)
}
