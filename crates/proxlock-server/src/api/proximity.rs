//! Proximity API endpoints.
//!
//! Read the tracker's current lock state, drive the search/idle commands,
//! and stream state changes as server-sent events.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use proxlock_core::{TrackerEvent, TrackerSnapshot};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::api::error::ApiResult;
use crate::state::SharedState;

/// Creates the proximity router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(get_proximity))
        .route("/search", post(begin_search))
        .route("/idle", post(force_idle))
        .route("/events", get(stream_events))
}

/// Get the current proximity state.
#[utoipa::path(
    get,
    path = "/api/proximity",
    tag = "proximity",
    operation_id = "getProximity",
    summary = "Get proximity state",
    description = "Returns the current position on the lock ladder together with the \
        link status, the last signal sample and any pending timeout.",
    responses(
        (status = 200, description = "Current tracker snapshot", body = TrackerSnapshot)
    )
)]
pub async fn get_proximity(State(state): State<SharedState>) -> Json<TrackerSnapshot> {
    Json(state.read().await.tracker.snapshot())
}

/// Begin searching for the badge.
#[utoipa::path(
    post,
    path = "/api/proximity/search",
    tag = "proximity",
    operation_id = "beginSearch",
    summary = "Begin searching",
    description = "Moves the tracker from `idle` to `searching` using the current badge \
        selector. Ignored in any other state; the returned snapshot shows the outcome.",
    responses(
        (status = 200, description = "Command processed", body = TrackerSnapshot),
        (status = 503, description = "Tracker is not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn begin_search(State(state): State<SharedState>) -> ApiResult<Json<TrackerSnapshot>> {
    let tracker = state.read().await.tracker.clone();
    let snapshot = tracker.begin_search().await?;
    info!(state = %snapshot.proximity_state, "Search requested");
    Ok(Json(snapshot))
}

/// Force the tracker back to idle.
#[utoipa::path(
    post,
    path = "/api/proximity/idle",
    tag = "proximity",
    operation_id = "forceIdle",
    summary = "Force idle",
    description = "Drops to `idle` from any state, cancelling the pending timeout and \
        releasing the badge link.",
    responses(
        (status = 200, description = "Command processed", body = TrackerSnapshot),
        (status = 503, description = "Tracker is not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn force_idle(State(state): State<SharedState>) -> ApiResult<Json<TrackerSnapshot>> {
    let tracker = state.read().await.tracker.clone();
    let snapshot = tracker.force_idle().await?;
    info!("Idle forced");
    Ok(Json(snapshot))
}

/// Stream tracker events.
#[utoipa::path(
    get,
    path = "/api/proximity/events",
    tag = "proximity",
    operation_id = "streamProximityEvents",
    summary = "Stream proximity events",
    description = "Server-sent events. Each event is named `state_changed` or `link_lost` \
        and carries the JSON-encoded tracker event.",
    responses(
        (status = 200, description = "Event stream", content_type = "text/event-stream", body = TrackerEvent)
    )
)]
pub async fn stream_events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.read().await.tracker.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let Some(sse) = to_sse(&event) else {
                        continue;
                    };
                    return Some((Ok(sse), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse(event: &TrackerEvent) -> Option<Event> {
    let name = match event {
        TrackerEvent::StateChanged(_) => "state_changed",
        TrackerEvent::LinkLost => "link_lost",
    };
    match Event::default().event(name).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            warn!(error = %e, "Failed to encode tracker event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use proxlock_core::{ProximityState, StateChange};

    #[test]
    fn test_state_change_encodes_as_named_event() {
        let event = TrackerEvent::StateChanged(StateChange {
            from: ProximityState::Searching,
            to: ProximityState::Unlocked,
            changed_at_utc: Utc::now(),
        });
        assert!(to_sse(&event).is_some());
        assert!(to_sse(&TrackerEvent::LinkLost).is_some());
    }
}
