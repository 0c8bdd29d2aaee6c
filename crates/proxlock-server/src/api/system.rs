//! System API endpoints.

use std::sync::OnceLock;
use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use proxlock_core::{LinkState, ProximityState};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::state::SharedState;

/// Creates the system router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/status", get(get_status))
}

/// System status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "version": "0.1.0",
    "uptime_secs": 3600,
    "radio_backend": "bluez",
    "adapter_powered": true,
    "link_state": "subscribed",
    "proximity_state": "unlocked",
    "tracker_running": true
}))]
pub struct SystemStatusResponse {
    /// Server version.
    #[schema(example = "0.1.0")]
    pub version: String,

    /// Server uptime in seconds.
    #[schema(example = 3600)]
    pub uptime_secs: u64,

    /// Radio backend serving the tracker: `bluez`, `simulated` or `detached`.
    #[schema(example = "bluez")]
    pub radio_backend: String,

    /// Whether the radio adapter is powered.
    pub adapter_powered: bool,

    /// Current link lifecycle state.
    pub link_state: LinkState,

    /// Current position on the lock ladder.
    pub proximity_state: ProximityState,

    /// Whether the tracker accepts commands.
    pub tracker_running: bool,
}

static SERVER_START_TIME: OnceLock<Instant> = OnceLock::new();

/// Initialize the server start time. Call this once at startup.
pub fn init_start_time() {
    SERVER_START_TIME.get_or_init(Instant::now);
}

fn get_uptime_secs() -> u64 {
    SERVER_START_TIME
        .get()
        .map_or(0, |start| start.elapsed().as_secs())
}

/// Get system status.
#[utoipa::path(
    get,
    path = "/api/system/status",
    tag = "system",
    operation_id = "getSystemStatus",
    summary = "Get system status",
    description = "Returns version, uptime, the radio backend in use and the current \
        link and proximity states.",
    responses(
        (status = 200, description = "System status retrieved", body = SystemStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<SystemStatusResponse> {
    let guard = state.read().await;
    let snapshot = guard.tracker.snapshot();

    Json(SystemStatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: get_uptime_secs(),
        radio_backend: guard.radio.as_str().to_string(),
        adapter_powered: snapshot.link.powered,
        link_state: snapshot.link.state,
        proximity_state: snapshot.proximity_state,
        tracker_running: guard.tracker.is_running(),
    })
}
