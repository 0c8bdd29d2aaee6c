//! OpenAPI specification for the proxlock API.
//!
//! Served at `/api/openapi.json` and written to the workspace root by the
//! `gen-openapi` binary for client generation.

use axum::Json;
use proxlock_core::{
    LinkState, LinkStatus, PeerId, PendingTimeout, ProximityState, SignalSample, StateChange,
    TrackerEvent, TrackerSnapshot,
};
use utoipa::OpenApi;

use super::config::{
    ConfigResponse, LinkConfigResponse, ProximityConfigResponse, UpdateTargetRequest,
    UpdateTargetResponse,
};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::system::SystemStatusResponse;
use super::tracking::StartTrackingRequest;

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// OpenAPI document for proxlock.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "proxlock API",
        version = "0.1.0",
        description = r#"
# proxlock API

proxlock locks a workstation when its owner's Bluetooth badge moves away.

## Lock ladder

The tracker moves through five states:

- **idle**: not tracking
- **searching**: looking for the badge
- **unlocked**: badge signal at or above the threshold
- **locked_short**: badge moved away recently and can still unlock
- **locked_long**: badge considered gone; returns to idle after a timeout

Every command returns the tracker snapshot after the command was applied.
State changes are also pushed on `/api/proximity/events`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local proxlock server")
    ),
    tags(
        (name = "system", description = "Health checks and system status"),
        (name = "proximity", description = "Lock ladder state and commands"),
        (name = "tracking", description = "Badge tracking sessions"),
        (name = "config", description = "Badge identifiers, thresholds and timeouts")
    ),
    paths(
        super::health::health_check,
        super::proximity::get_proximity,
        super::proximity::begin_search,
        super::proximity::force_idle,
        super::proximity::stream_events,
        super::tracking::start_tracking,
        super::tracking::stop_tracking,
        super::config::get_config,
        super::config::update_target,
        super::system::get_status,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            // Tracker types
            TrackerSnapshot,
            PendingTimeout,
            LinkStatus,
            LinkState,
            ProximityState,
            SignalSample,
            StateChange,
            TrackerEvent,
            PeerId,
            StartTrackingRequest,
            // Config types
            ConfigResponse,
            LinkConfigResponse,
            ProximityConfigResponse,
            UpdateTargetRequest,
            UpdateTargetResponse,
            SystemStatusResponse,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "proxlock API");
        assert!(spec.paths.paths.contains_key("/api/proximity"));
        assert!(spec.paths.paths.contains_key("/api/tracking/start"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"proxlock API\""));
        assert!(json.contains("TrackerSnapshot"));
    }
}
