//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `config` - Badge identifiers, thresholds and timeouts
//! - `health` - Service health checks
//! - `proximity` - Lock ladder state, commands and event stream
//! - `system` - Version, uptime and radio status
//! - `tracking` - Badge tracking sessions
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod config;
pub mod error;
pub mod health;
pub mod openapi;
pub mod proximity;
pub mod system;
pub mod tracking;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /api
/// ├── /proximity         - Snapshot, search, idle, event stream
/// ├── /tracking          - Start and stop tracking
/// ├── /config            - Configuration and default badge
/// ├── /system            - System status
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    system::init_start_time();

    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/proximity", proximity::router())
                .nest("/tracking", tracking::router())
                .nest("/config", config::router())
                .nest("/system", system::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use proxlock_core::bluetooth::{self, RadioEvent, RadioRequest};
    use proxlock_core::{tracker, Config, TrackerHandle};
    use serde_json::Value;
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use super::*;
    use crate::state::{AppState, RadioBackend};

    /// Router on a tracker whose radio nobody serves. The held channel ends
    /// keep the link manager alive.
    struct TestApp {
        router: Router,
        tracker: TrackerHandle,
        radio_events: mpsc::UnboundedSender<RadioEvent>,
        _radio_requests: mpsc::UnboundedReceiver<RadioRequest>,
        dir: TempDir,
    }

    impl TestApp {
        /// Adapter reported on, so searches are accepted.
        async fn new() -> Self {
            let app = Self::unpowered();
            app.radio_events.send(RadioEvent::PowerChanged(true)).unwrap();
            while !app.tracker.link_status().powered {
                tokio::task::yield_now().await;
            }
            app
        }

        fn unpowered() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let config = Config::default();
            let (handle, requests, events_tx, events_rx) = bluetooth::channel();
            let tracker = tracker::spawn(&config, handle, events_rx);
            let state = AppState::new(
                config,
                dir.path().join("config.toml"),
                tracker.clone(),
                RadioBackend::Detached,
            );
            Self {
                router: create_router(state),
                tracker,
                radio_events: events_tx,
                _radio_requests: requests,
                dir,
            }
        }

        fn config_file(&self) -> PathBuf {
            self.dir.path().join("config.toml")
        }

        async fn send(&self, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
            let builder = Request::builder().method(method).uri(uri);
            let request = match body {
                Some(json) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json.to_string())),
                None => builder.body(Body::empty()),
            }
            .unwrap();

            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }
    }

    #[tokio::test]
    async fn test_health_reports_running_tracker() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tracker_running"], true);
    }

    #[tokio::test]
    async fn test_proximity_starts_idle() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/api/proximity", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "idle");
        assert!(body["pending_timeout"].is_null());
    }

    #[tokio::test]
    async fn test_search_then_idle() {
        let app = TestApp::new().await;

        let (status, body) = app.send(Method::POST, "/api/proximity/search", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "searching");
        assert_eq!(body["pending_timeout"]["target"], "idle");

        let (status, body) = app.send(Method::POST, "/api/proximity/idle", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "idle");
        assert!(body["pending_timeout"].is_null());
    }

    #[tokio::test]
    async fn test_search_refused_while_adapter_off() {
        let app = TestApp::unpowered();
        let (status, body) = app.send(Method::POST, "/api/proximity/search", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "idle");
        assert!(body["pending_timeout"].is_null());
    }

    #[tokio::test]
    async fn test_start_tracking_rejects_bad_address() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/api/tracking/start",
                Some(r#"{"target_address":"not-an-address"}"#),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_bluetooth_address");
    }

    #[tokio::test]
    async fn test_start_tracking_limits_search_to_address() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::POST,
                "/api/tracking/start",
                Some(r#"{"target_address":"aa:bb:cc:dd:ee:ff"}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "searching");
        assert_eq!(body["target_address"], "AA:BB:CC:DD:EE:FF");

        let (status, body) = app.send(Method::POST, "/api/tracking/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity_state"], "idle");
    }

    #[tokio::test]
    async fn test_config_reports_thresholds() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/api/config", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["proximity"]["threshold_rssi"], -45);
        assert!(body["link"]["target_address"].is_null());
    }

    #[tokio::test]
    async fn test_update_target_is_persisted() {
        let app = TestApp::new().await;
        let (status, body) = app
            .send(
                Method::PUT,
                "/api/config/target",
                Some(r#"{"target_address":"aa:bb:cc:dd:ee:01"}"#),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target_address"], "AA:BB:CC:DD:EE:01");

        let saved = Config::load(app.config_file()).unwrap();
        assert_eq!(saved.link.target_address.as_deref(), Some("AA:BB:CC:DD:EE:01"));

        let (_, body) = app.send(Method::GET, "/api/config", None).await;
        assert_eq!(body["link"]["target_address"], "AA:BB:CC:DD:EE:01");
    }

    #[tokio::test]
    async fn test_update_target_rejects_bad_address() {
        let app = TestApp::new().await;
        let (status, _) = app
            .send(
                Method::PUT,
                "/api/config/target",
                Some(r#"{"target_address":"AA:BB"}"#),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(!app.config_file().exists());
    }

    #[tokio::test]
    async fn test_system_status_names_backend() {
        let app = TestApp::unpowered();
        let (status, body) = app.send(Method::GET, "/api/system/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["radio_backend"], "detached");
        assert_eq!(body["adapter_powered"], false);
        assert_eq!(body["proximity_state"], "idle");
    }

    #[tokio::test]
    async fn test_openapi_json_is_served() {
        let app = TestApp::new().await;
        let (status, body) = app.send(Method::GET, "/api/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "proxlock API");
    }
}
