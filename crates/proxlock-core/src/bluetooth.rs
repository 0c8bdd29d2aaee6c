//! Radio seam between the link manager and a Bluetooth stack.
//!
//! The link manager never calls the radio stack directly. It submits
//! fire-and-forget [`RadioRequest`]s through a [`RadioHandle`] and receives
//! completions as [`RadioEvent`]s, in order, on a channel. Backends:
//!
//! - [`bluez`] - BlueZ over D-Bus (feature `bluetooth`, Linux only)
//! - [`simulated`] - an in-process badge (feature `mock-bluetooth`, and tests)

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::types::PeerId;

#[cfg(feature = "bluetooth")]
pub mod bluez;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod simulated;

/// Errors reported by radio backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    /// No adapter is present.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// The adapter is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// The Bluetooth daemon could not be reached.
    #[error("Failed to open Bluetooth session: {message}")]
    SessionInitFailed {
        /// Backend-specific detail.
        message: String,
    },

    /// A peer address could not be parsed.
    #[error("Invalid Bluetooth address: {address}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// The peer is not connected.
    #[error("Peer {peer} is not connected")]
    NotConnected {
        /// Peer the operation targeted.
        peer: PeerId,
    },

    /// The peer does not expose the requested service.
    #[error("Service {uuid} not found")]
    ServiceNotFound {
        /// Missing service.
        uuid: Uuid,
    },

    /// The service does not expose the requested characteristic.
    #[error("Characteristic {uuid} not found")]
    CharacteristicNotFound {
        /// Missing characteristic.
        uuid: Uuid,
    },

    /// The stack has no signal strength for the peer right now.
    #[error("RSSI not available")]
    RssiUnavailable,

    /// Any other backend failure.
    #[error("{message}")]
    Operation {
        /// Backend-specific detail.
        message: String,
    },
}

/// Result type for radio operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Operations the link manager asks of the radio backend.
///
/// Each request completes asynchronously with the matching [`RadioEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioRequest {
    /// Discover peers advertising `service`.
    StartScan {
        /// Service used as discovery filter.
        service: Uuid,
    },
    /// Stop discovery. No completion event.
    StopScan,
    /// Connect to a discovered peer.
    Connect {
        /// Peer to connect.
        peer: PeerId,
    },
    /// Tear down a connection. Completes with `Disconnected`, if at all.
    Disconnect {
        /// Peer to disconnect.
        peer: PeerId,
    },
    /// Resolve the peer's GATT services, scoped to `service`.
    DiscoverServices {
        /// Connected peer.
        peer: PeerId,
        /// Service of interest.
        service: Uuid,
    },
    /// List the characteristics of `service`.
    DiscoverCharacteristics {
        /// Connected peer.
        peer: PeerId,
        /// Service to inspect.
        service: Uuid,
    },
    /// Subscribe to value-change notifications of a characteristic.
    Subscribe {
        /// Connected peer.
        peer: PeerId,
        /// Owning service.
        service: Uuid,
        /// Characteristic to subscribe to.
        characteristic: Uuid,
    },
    /// Read the signal strength of the connection.
    ReadRssi {
        /// Connected peer.
        peer: PeerId,
    },
}

/// Completions and unsolicited notifications from the radio backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// Adapter power changed (also sent once at startup).
    PowerChanged(bool),
    /// A peer advertising the scanned service was seen.
    Discovered {
        /// Peer address.
        peer: PeerId,
        /// Advertisement RSSI, if reported.
        rssi: Option<i16>,
    },
    /// Connection established.
    Connected {
        /// Peer address.
        peer: PeerId,
    },
    /// Connection attempt failed.
    ConnectFailed {
        /// Peer address.
        peer: PeerId,
        /// Why it failed.
        error: LinkError,
    },
    /// The connection went down.
    Disconnected {
        /// Peer address.
        peer: PeerId,
    },
    /// The peer's services changed and previous handles are invalid.
    ServicesInvalidated {
        /// Peer address.
        peer: PeerId,
    },
    /// Result of [`RadioRequest::DiscoverServices`].
    ServicesDiscovered {
        /// Peer address.
        peer: PeerId,
        /// Services found.
        result: LinkResult<Vec<Uuid>>,
    },
    /// Result of [`RadioRequest::DiscoverCharacteristics`].
    CharacteristicsDiscovered {
        /// Peer address.
        peer: PeerId,
        /// Service inspected.
        service: Uuid,
        /// Characteristics found.
        result: LinkResult<Vec<Uuid>>,
    },
    /// Result of [`RadioRequest::Subscribe`].
    Subscribed {
        /// Peer address.
        peer: PeerId,
        /// Characteristic subscribed to.
        characteristic: Uuid,
        /// Outcome.
        result: LinkResult<()>,
    },
    /// A notified characteristic value.
    Notification {
        /// Peer address.
        peer: PeerId,
        /// Raw value.
        value: Vec<u8>,
    },
    /// Result of [`RadioRequest::ReadRssi`].
    RssiRead {
        /// Peer address.
        peer: PeerId,
        /// Signal strength in dBm.
        result: LinkResult<i16>,
    },
}

/// Sending half used by the link manager to drive a backend.
#[derive(Debug, Clone)]
pub struct RadioHandle {
    requests: mpsc::UnboundedSender<RadioRequest>,
}

impl RadioHandle {
    /// Wrap a request sender.
    #[must_use]
    pub const fn new(requests: mpsc::UnboundedSender<RadioRequest>) -> Self {
        Self { requests }
    }

    /// Submit a request. A stopped backend is logged and otherwise ignored.
    pub fn submit(&self, request: RadioRequest) {
        if let Err(err) = self.requests.send(request) {
            warn!(request = ?err.0, "Radio backend is gone, dropping request");
        }
    }
}

/// Create the channels connecting a link manager to a backend.
///
/// Returns the handle for the link manager, the request receiver for the
/// backend, and the event sender/receiver pair.
#[must_use]
pub fn channel() -> (
    RadioHandle,
    mpsc::UnboundedReceiver<RadioRequest>,
    mpsc::UnboundedSender<RadioEvent>,
    mpsc::UnboundedReceiver<RadioEvent>,
) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (RadioHandle::new(request_tx), request_rx, event_tx, event_rx)
}
