//! Shared types and OpenAPI schemas.
//!
//! This module contains the vocabulary shared by the link manager, the
//! proximity state machine and their consumers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Radio link lifecycle, owned by the link manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// Adapter is powered off or its state is not yet known.
    AdapterOff,
    /// Adapter is powered on and no session has been attempted yet.
    AdapterOn,
    /// Adapter is powered on and the last session has ended.
    Idle,
    /// Discovery for the badge service is running.
    Scanning,
    /// A peer was found; connection and GATT discovery are in flight.
    Connecting,
    /// The badge characteristic is subscribed and signal sampling runs.
    Subscribed,
}

impl LinkState {
    /// Returns `true` while a session is being established or is established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Scanning | Self::Connecting | Self::Subscribed)
    }
}

/// Security state on the proximity ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProximityState {
    /// Not tracking. The link is stopped.
    Idle,
    /// Looking for the badge.
    Searching,
    /// Badge is close.
    Unlocked,
    /// Badge moved away recently; it can still unlock again.
    LockedShort,
    /// Badge is considered gone. Only a timeout leaves this state.
    LockedLong,
}

impl fmt::Display for ProximityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Searching => "searching",
            Self::Unlocked => "unlocked",
            Self::LockedShort => "locked_short",
            Self::LockedLong => "locked_long",
        };
        f.write_str(name)
    }
}

/// One signal strength reading taken against the active connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SignalSample {
    /// Received signal strength in dBm.
    #[schema(example = -42)]
    pub rssi: i16,

    /// When the reading completed (UTC).
    pub taken_at_utc: DateTime<Utc>,
}

impl SignalSample {
    /// Create a sample stamped with the current time.
    #[must_use]
    pub fn now(rssi: i16) -> Self {
        Self {
            rssi,
            taken_at_utc: Utc::now(),
        }
    }
}

/// Radio address of a peer, as reported by the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "AA:BB:CC:DD:EE:FF")]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a radio address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which badge a tracking session should connect to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "address", rename_all = "snake_case")]
pub enum TargetSelector {
    /// First peer advertising the badge service.
    #[default]
    AnyBadge,
    /// Only the peer with this address.
    Address(PeerId),
}

impl TargetSelector {
    /// Returns `true` if `peer` is acceptable for this selector.
    #[must_use]
    pub fn matches(&self, peer: &PeerId) -> bool {
        match self {
            Self::AnyBadge => true,
            Self::Address(wanted) => wanted.as_str().eq_ignore_ascii_case(peer.as_str()),
        }
    }
}

/// Events emitted by the link manager to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The adapter powered on and can accept a start.
    AdapterReady,
    /// A signal strength reading from the active connection.
    Sample(SignalSample),
    /// The session ended without being asked to.
    LinkLost,
    /// Discovery ended without a matching peer. The link is idle again.
    ScanTimedOut,
    /// A `Stop` command was carried out. Every event before it belongs to
    /// the session that was stopped.
    Stopped,
}

/// Link manager status published for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct LinkStatus {
    /// Current link lifecycle state.
    pub state: LinkState,

    /// Whether a start is in progress or a session is up.
    pub busy: bool,

    /// Whether the radio adapter is powered.
    pub powered: bool,
}

impl Default for LinkStatus {
    fn default() -> Self {
        Self {
            state: LinkState::AdapterOff,
            busy: false,
            powered: false,
        }
    }
}

/// A completed proximity transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StateChange {
    /// State before the transition.
    pub from: ProximityState,

    /// State after the transition.
    pub to: ProximityState,

    /// When the transition happened (UTC).
    pub changed_at_utc: DateTime<Utc>,
}

/// Notifications delivered to tracker observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TrackerEvent {
    /// The proximity state changed.
    StateChanged(StateChange),
    /// The badge link dropped unexpectedly.
    LinkLost,
}
