//! In-process simulated badge.
//!
//! Answers [`RadioRequest`]s the way a single badge in a room would, so the
//! server can run without radio hardware. The badge's signal strength and
//! presence are driven at runtime through [`SimulatedControl`].

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use super::{LinkError, RadioEvent, RadioRequest};
use crate::config::{BADGE_CHARACTERISTIC_UUID, BADGE_SERVICE_UUID};
use crate::timer::{earliest, sleep_until_opt};
use crate::types::PeerId;

/// Static description of the simulated badge.
#[derive(Debug, Clone)]
pub struct BadgeProfile {
    /// Radio address the badge reports.
    pub address: PeerId,
    /// Advertised GATT service.
    pub service: Uuid,
    /// Characteristic exposed under `service`.
    pub characteristic: Uuid,
    /// Initial signal strength in dBm.
    pub rssi: i16,
    /// Whether the badge starts within radio range.
    pub in_range: bool,
    /// Delay between a scan starting and the badge being reported.
    pub discovery_delay: Duration,
    /// Delay between a connect request and its completion.
    pub connect_delay: Duration,
}

impl Default for BadgeProfile {
    fn default() -> Self {
        Self {
            address: PeerId::new("C0:FF:EE:00:00:01"),
            service: BADGE_SERVICE_UUID,
            characteristic: BADGE_CHARACTERISTIC_UUID,
            rssi: -40,
            in_range: true,
            discovery_delay: Duration::from_millis(500),
            connect_delay: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
enum Control {
    SetRssi(i16),
    SetInRange(bool),
    SetPowered(bool),
    DropConnection,
}

/// Runtime knobs for a running simulated badge.
#[derive(Debug, Clone)]
pub struct SimulatedControl {
    tx: mpsc::UnboundedSender<Control>,
}

impl SimulatedControl {
    /// Change the signal strength reported by subsequent reads.
    pub fn set_rssi(&self, rssi: i16) {
        self.send(Control::SetRssi(rssi));
    }

    /// Move the badge into or out of range. Leaving range drops the connection.
    pub fn set_in_range(&self, in_range: bool) {
        self.send(Control::SetInRange(in_range));
    }

    /// Power the simulated adapter on or off.
    pub fn set_powered(&self, powered: bool) {
        self.send(Control::SetPowered(powered));
    }

    /// Drop the connection as if the badge had reset.
    pub fn drop_connection(&self) {
        self.send(Control::DropConnection);
    }

    fn send(&self, control: Control) {
        if self.tx.send(control).is_err() {
            debug!("Simulated badge stopped, ignoring control");
        }
    }
}

struct Badge {
    profile: BadgeProfile,
    events: mpsc::UnboundedSender<RadioEvent>,
    powered: bool,
    scanning: Option<Uuid>,
    connected: bool,
    discover_at: Option<Instant>,
    connect_at: Option<Instant>,
}

/// Spawn a simulated badge serving `requests` and reporting on `events`.
///
/// The adapter reports powered on immediately. The task ends when the
/// request channel closes.
pub fn spawn(
    profile: BadgeProfile,
    requests: mpsc::UnboundedReceiver<RadioRequest>,
    events: mpsc::UnboundedSender<RadioEvent>,
) -> (SimulatedControl, JoinHandle<()>) {
    let (tx, controls) = mpsc::unbounded_channel();
    info!(address = %profile.address, rssi = profile.rssi, "Starting simulated badge");
    let badge = Badge {
        profile,
        events,
        powered: true,
        scanning: None,
        connected: false,
        discover_at: None,
        connect_at: None,
    };
    let handle = tokio::spawn(badge.run(requests, controls));
    (SimulatedControl { tx }, handle)
}

impl Badge {
    async fn run(
        mut self,
        mut requests: mpsc::UnboundedReceiver<RadioRequest>,
        mut controls: mpsc::UnboundedReceiver<Control>,
    ) {
        self.emit(RadioEvent::PowerChanged(true));
        loop {
            let deadline = earliest(self.discover_at, self.connect_at);
            tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.on_request(request, Instant::now()),
                    None => break,
                },
                Some(control) = controls.recv() => self.on_control(control, Instant::now()),
                () = sleep_until_opt(deadline) => self.on_deadline(Instant::now()),
            }
        }
        debug!("Simulated badge stopped");
    }

    fn on_request(&mut self, request: RadioRequest, now: Instant) {
        if !self.powered {
            debug!(?request, "Adapter off, ignoring request");
            return;
        }
        let address = self.profile.address.clone();
        match request {
            RadioRequest::StartScan { service } => {
                self.scanning = Some(service);
                self.schedule_discovery(now);
            }
            RadioRequest::StopScan => {
                self.scanning = None;
                self.discover_at = None;
            }
            RadioRequest::Connect { peer } => {
                if peer == address {
                    self.connect_at = Some(now + self.profile.connect_delay);
                } else {
                    self.emit(RadioEvent::ConnectFailed {
                        error: LinkError::NotConnected { peer: peer.clone() },
                        peer,
                    });
                }
            }
            RadioRequest::Disconnect { peer } => {
                self.connect_at = None;
                if peer == address && self.connected {
                    self.connected = false;
                    self.emit(RadioEvent::Disconnected { peer });
                }
            }
            RadioRequest::DiscoverServices { peer, .. } => {
                let result = self
                    .require_connected(&peer)
                    .map(|()| vec![self.profile.service]);
                self.emit(RadioEvent::ServicesDiscovered { peer, result });
            }
            RadioRequest::DiscoverCharacteristics { peer, service } => {
                let result = self.require_connected(&peer).and_then(|()| {
                    if service == self.profile.service {
                        Ok(vec![self.profile.characteristic])
                    } else {
                        Err(LinkError::ServiceNotFound { uuid: service })
                    }
                });
                self.emit(RadioEvent::CharacteristicsDiscovered {
                    peer,
                    service,
                    result,
                });
            }
            RadioRequest::Subscribe {
                peer,
                characteristic,
                ..
            } => {
                let result = self.require_connected(&peer).and_then(|()| {
                    if characteristic == self.profile.characteristic {
                        Ok(())
                    } else {
                        Err(LinkError::CharacteristicNotFound {
                            uuid: characteristic,
                        })
                    }
                });
                self.emit(RadioEvent::Subscribed {
                    peer,
                    characteristic,
                    result,
                });
            }
            RadioRequest::ReadRssi { peer } => {
                let result = self
                    .require_connected(&peer)
                    .map(|()| self.profile.rssi);
                self.emit(RadioEvent::RssiRead { peer, result });
            }
        }
    }

    fn on_control(&mut self, control: Control, now: Instant) {
        debug!(?control, "Simulated badge control");
        match control {
            Control::SetRssi(rssi) => self.profile.rssi = rssi,
            Control::SetInRange(in_range) => {
                self.profile.in_range = in_range;
                if in_range {
                    self.schedule_discovery(now);
                } else {
                    self.discover_at = None;
                    self.drop_connection();
                }
            }
            Control::SetPowered(powered) => {
                if powered == self.powered {
                    return;
                }
                self.powered = powered;
                if !powered {
                    self.scanning = None;
                    self.connected = false;
                    self.discover_at = None;
                    self.connect_at = None;
                }
                self.emit(RadioEvent::PowerChanged(powered));
            }
            Control::DropConnection => self.drop_connection(),
        }
    }

    fn on_deadline(&mut self, now: Instant) {
        let peer = self.profile.address.clone();
        if self.discover_at.is_some_and(|at| now >= at) {
            self.discover_at = None;
            if self.profile.in_range && self.scanning.is_some() {
                self.emit(RadioEvent::Discovered {
                    peer: peer.clone(),
                    rssi: Some(self.profile.rssi),
                });
            }
        }
        if self.connect_at.is_some_and(|at| now >= at) {
            self.connect_at = None;
            if self.profile.in_range {
                self.connected = true;
                self.emit(RadioEvent::Connected { peer });
            } else {
                self.emit(RadioEvent::ConnectFailed {
                    peer,
                    error: LinkError::Operation {
                        message: "peer out of range".to_string(),
                    },
                });
            }
        }
    }

    fn schedule_discovery(&mut self, now: Instant) {
        let advertises = self.scanning == Some(self.profile.service);
        if advertises && self.profile.in_range && !self.connected && self.discover_at.is_none() {
            self.discover_at = Some(now + self.profile.discovery_delay);
        }
    }

    fn drop_connection(&mut self) {
        if self.connected {
            self.connected = false;
            self.emit(RadioEvent::Disconnected {
                peer: self.profile.address.clone(),
            });
        }
    }

    fn require_connected(&self, peer: &PeerId) -> Result<(), LinkError> {
        if self.connected && *peer == self.profile.address {
            Ok(())
        } else {
            Err(LinkError::NotConnected { peer: peer.clone() })
        }
    }

    fn emit(&self, event: RadioEvent) {
        if self.events.send(event).is_err() {
            debug!("Radio event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rig {
        control: SimulatedControl,
        requests: mpsc::UnboundedSender<RadioRequest>,
        events: mpsc::UnboundedReceiver<RadioEvent>,
    }

    async fn rig() -> Rig {
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (control, _task) = spawn(BadgeProfile::default(), request_rx, event_tx);
        assert_eq!(events.recv().await, Some(RadioEvent::PowerChanged(true)));
        Rig {
            control,
            requests,
            events,
        }
    }

    fn badge() -> PeerId {
        BadgeProfile::default().address
    }

    async fn connect(rig: &mut Rig) {
        rig.requests
            .send(RadioRequest::Connect { peer: badge() })
            .unwrap();
        assert_eq!(
            rig.events.recv().await,
            Some(RadioEvent::Connected { peer: badge() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_reports_badge_after_delay() {
        let mut rig = rig().await;
        let started = Instant::now();
        rig.requests
            .send(RadioRequest::StartScan {
                service: BADGE_SERVICE_UUID,
            })
            .unwrap();

        let event = rig.events.recv().await;
        assert_eq!(
            event,
            Some(RadioEvent::Discovered {
                peer: badge(),
                rssi: Some(-40),
            })
        );
        assert!(started.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_badge_is_not_discovered() {
        let mut rig = rig().await;
        rig.control.set_in_range(false);
        rig.requests
            .send(RadioRequest::StartScan {
                service: BADGE_SERVICE_UUID,
            })
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), rig.events.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_service_is_not_discovered() {
        let mut rig = rig().await;
        rig.requests
            .send(RadioRequest::StartScan {
                service: Uuid::nil(),
            })
            .unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), rig.events.recv()).await;
        assert!(outcome.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rssi_follows_control() {
        let mut rig = rig().await;
        connect(&mut rig).await;

        rig.control.set_rssi(-72);
        rig.requests
            .send(RadioRequest::ReadRssi { peer: badge() })
            .unwrap();
        assert_eq!(
            rig.events.recv().await,
            Some(RadioEvent::RssiRead {
                peer: badge(),
                result: Ok(-72),
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gatt_requires_connection() {
        let mut rig = rig().await;
        rig.requests
            .send(RadioRequest::ReadRssi { peer: badge() })
            .unwrap();
        assert!(matches!(
            rig.events.recv().await,
            Some(RadioEvent::RssiRead {
                result: Err(LinkError::NotConnected { .. }),
                ..
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_range_disconnects() {
        let mut rig = rig().await;
        connect(&mut rig).await;

        rig.control.set_in_range(false);
        assert_eq!(
            rig.events.recv().await,
            Some(RadioEvent::Disconnected { peer: badge() })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_toggle_is_reported() {
        let mut rig = rig().await;
        rig.control.set_powered(false);
        assert_eq!(rig.events.recv().await, Some(RadioEvent::PowerChanged(false)));
        rig.control.set_powered(true);
        assert_eq!(rig.events.recv().await, Some(RadioEvent::PowerChanged(true)));
    }
}
