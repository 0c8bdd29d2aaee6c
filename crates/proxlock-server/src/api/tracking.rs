//! Tracking session endpoints.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use proxlock_core::{is_valid_mac_address, PeerId, TargetSelector, TrackerSnapshot};
use serde::Deserialize;
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the tracking router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/start", post(start_tracking))
        .route("/stop", post(stop_tracking))
}

/// Request to start tracking a badge.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[schema(example = json!({
    "target_address": "AA:BB:CC:DD:EE:FF"
}))]
pub struct StartTrackingRequest {
    /// Only connect to this badge. Falls back to the configured address,
    /// then to the first badge found.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub target_address: Option<String>,
}

/// Start tracking.
#[utoipa::path(
    post,
    path = "/api/tracking/start",
    tag = "tracking",
    operation_id = "startTracking",
    summary = "Start tracking a badge",
    description = "Sets the badge selector and begins searching. Ignored while a session \
        is already in progress; the returned snapshot shows the outcome.",
    request_body = StartTrackingRequest,
    responses(
        (status = 200, description = "Command processed", body = TrackerSnapshot),
        (status = 400, description = "Invalid Bluetooth address", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Tracker is not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn start_tracking(
    State(state): State<SharedState>,
    Json(request): Json<StartTrackingRequest>,
) -> ApiResult<Json<TrackerSnapshot>> {
    let (tracker, configured) = {
        let guard = state.read().await;
        (guard.tracker.clone(), guard.config.link.target_address.clone())
    };

    let selector = match request.target_address.or(configured) {
        Some(address) if !is_valid_mac_address(&address) => {
            return Err(ApiError::bad_request(
                "invalid_bluetooth_address",
                format!("Invalid Bluetooth address format: '{address}'"),
            ));
        }
        Some(address) => TargetSelector::Address(PeerId::new(address.to_uppercase())),
        None => TargetSelector::AnyBadge,
    };

    info!(?selector, "Start tracking requested");
    let snapshot = tracker.start_tracking(selector).await?;
    Ok(Json(snapshot))
}

/// Stop tracking.
#[utoipa::path(
    post,
    path = "/api/tracking/stop",
    tag = "tracking",
    operation_id = "stopTracking",
    summary = "Stop tracking",
    description = "Returns to `idle` and releases the badge link. Safe when already stopped.",
    responses(
        (status = 200, description = "Command processed", body = TrackerSnapshot),
        (status = 503, description = "Tracker is not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn stop_tracking(State(state): State<SharedState>) -> ApiResult<Json<TrackerSnapshot>> {
    let tracker = state.read().await.tracker.clone();
    info!("Stop tracking requested");
    Ok(Json(tracker.stop_tracking().await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_address_is_optional() {
        let request: StartTrackingRequest = serde_json::from_str("{}").unwrap();
        assert!(request.target_address.is_none());

        let request: StartTrackingRequest =
            serde_json::from_str(r#"{"target_address":"AA:BB:CC:DD:EE:FF"}"#).unwrap();
        assert_eq!(request.target_address.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
    }
}
