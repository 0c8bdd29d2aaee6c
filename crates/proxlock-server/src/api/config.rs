//! Configuration API endpoints.
//!
//! Thresholds and ladder timeouts are read-only at runtime. The default
//! badge address can be changed and is persisted to the configuration file;
//! it applies from the next tracking start.

use axum::extract::State;
use axum::routing::{get, put};
use axum::{Json, Router};
use proxlock_core::{is_valid_mac_address, Config};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the config router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_config))
        .route("/target", put(update_target))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Current configuration.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfigResponse {
    /// Radio link settings.
    pub link: LinkConfigResponse,

    /// Thresholds and ladder timeouts.
    pub proximity: ProximityConfigResponse,
}

/// Radio link settings.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "service_uuid": "1fe5d02c-78ab-414d-ad97-1a4e5297227a",
    "characteristic_uuid": "8c881368-8c34-41fd-8bcc-ad7ea408b1ee",
    "scan_timeout_secs": 5.0,
    "sample_interval_secs": 1.0,
    "target_address": null
}))]
pub struct LinkConfigResponse {
    /// GATT service the badge advertises.
    pub service_uuid: Uuid,

    /// GATT characteristic subscribed to.
    pub characteristic_uuid: Uuid,

    /// Discovery timeout per scan, in seconds.
    pub scan_timeout_secs: f64,

    /// Signal sampling cadence, in seconds.
    pub sample_interval_secs: f64,

    /// Default badge address, if any.
    pub target_address: Option<String>,
}

/// Thresholds and ladder timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "min_rssi": -80,
    "max_rssi": -20,
    "threshold_rssi": -45,
    "search_timeout_secs": 20.0,
    "unlocked_to_locked_short_secs": 5.0,
    "locked_short_to_locked_long_secs": 15.0,
    "locked_long_to_idle_secs": 20.0
}))]
pub struct ProximityConfigResponse {
    /// Weakest signal on the display scale, in dBm.
    pub min_rssi: i16,
    /// Strongest signal on the display scale, in dBm.
    pub max_rssi: i16,
    /// Samples at or above this unlock, in dBm.
    pub threshold_rssi: i16,
    /// `searching` gives up after this long.
    pub search_timeout_secs: f64,
    /// Grace period before a weak signal locks.
    pub unlocked_to_locked_short_secs: f64,
    /// `locked_short` escalates after this long.
    pub locked_short_to_locked_long_secs: f64,
    /// `locked_long` returns to idle after this long.
    pub locked_long_to_idle_secs: f64,
}

impl From<&Config> for ConfigResponse {
    fn from(config: &Config) -> Self {
        let link = &config.link;
        let p = &config.proximity;
        Self {
            link: LinkConfigResponse {
                service_uuid: link.service_uuid,
                characteristic_uuid: link.characteristic_uuid,
                scan_timeout_secs: link.scan_timeout.as_secs_f64(),
                sample_interval_secs: link.sample_interval.as_secs_f64(),
                target_address: link.target_address.clone(),
            },
            proximity: ProximityConfigResponse {
                min_rssi: p.min_rssi,
                max_rssi: p.max_rssi,
                threshold_rssi: p.threshold_rssi,
                search_timeout_secs: p.search_timeout.as_secs_f64(),
                unlocked_to_locked_short_secs: p.unlocked_to_locked_short.as_secs_f64(),
                locked_short_to_locked_long_secs: p.locked_short_to_locked_long.as_secs_f64(),
                locked_long_to_idle_secs: p.locked_long_to_idle.as_secs_f64(),
            },
        }
    }
}

/// Request to change the default badge address.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[schema(example = json!({
    "target_address": "AA:BB:CC:DD:EE:FF"
}))]
pub struct UpdateTargetRequest {
    /// Badge address (`XX:XX:XX:XX:XX:XX`), or `null` to accept any badge.
    #[schema(example = "AA:BB:CC:DD:EE:FF")]
    pub target_address: Option<String>,
}

/// Response after changing the default badge address.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UpdateTargetResponse {
    /// Whether the update was saved.
    pub success: bool,

    /// Default badge address now in effect.
    pub target_address: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get current configuration.
#[utoipa::path(
    get,
    path = "/api/config",
    tag = "config",
    operation_id = "getConfig",
    summary = "Get configuration",
    description = "Returns the badge identifiers, signal thresholds and ladder timeouts \
        the tracker runs with.",
    responses(
        (status = 200, description = "Current configuration", body = ConfigResponse)
    )
)]
pub async fn get_config(State(state): State<SharedState>) -> Json<ConfigResponse> {
    Json(ConfigResponse::from(&state.read().await.config))
}

/// Change the default badge address.
#[utoipa::path(
    put,
    path = "/api/config/target",
    tag = "config",
    operation_id = "updateTarget",
    summary = "Update default badge",
    description = "Sets the badge address used when tracking starts without one. \
        Takes effect from the next start.",
    request_body = UpdateTargetRequest,
    responses(
        (status = 200, description = "Default badge updated", body = UpdateTargetResponse),
        (status = 400, description = "Invalid Bluetooth address", body = crate::api::error::ErrorResponse),
        (status = 500, description = "Configuration could not be saved", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn update_target(
    State(state): State<SharedState>,
    Json(request): Json<UpdateTargetRequest>,
) -> ApiResult<Json<UpdateTargetResponse>> {
    if let Some(address) = &request.target_address {
        if !is_valid_mac_address(address) {
            return Err(ApiError::bad_request(
                "invalid_bluetooth_address",
                "Bluetooth address must be in format XX:XX:XX:XX:XX:XX",
            ));
        }
    }
    let target_address = request.target_address.map(|a| a.to_uppercase());

    let mut guard = state.write().await;
    let previous = guard.config.link.target_address.clone();
    guard.config.link.target_address.clone_from(&target_address);

    if let Err(e) = guard.save_config() {
        guard.config.link.target_address = previous;
        return Err(ApiError::InternalError {
            error_code: "config_save_failed".to_string(),
            message: "Failed to save configuration".to_string(),
            details: Some(e.to_string()),
        });
    }

    info!(?target_address, "Default badge updated");
    Ok(Json(UpdateTargetResponse {
        success: true,
        target_address,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_response_reports_seconds() {
        let response = ConfigResponse::from(&Config::default());
        assert_eq!(response.proximity.threshold_rssi, -45);
        assert!((response.proximity.search_timeout_secs - 20.0).abs() < f64::EPSILON);
        assert!((response.link.scan_timeout_secs - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_update_target_request_accepts_null() {
        let request: UpdateTargetRequest =
            serde_json::from_str(r#"{"target_address":null}"#).unwrap();
        assert!(request.target_address.is_none());
    }
}
