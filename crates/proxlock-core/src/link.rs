//! Link manager: owns the single badge session over the radio.
//!
//! The manager drives a radio backend through [`RadioHandle`] and reacts to
//! the backend's [`RadioEvent`]s. It reduces everything that can happen on
//! the radio to a small [`LinkEvent`] stream for its owner:
//!
//! - `AdapterReady` when the adapter powers on
//! - `Sample` for every successful signal strength read
//! - `LinkLost` when an established or starting session ends unasked
//! - `ScanTimedOut` when discovery finds nothing in time
//!
//! Radio errors are logged here and never leave the manager in any other
//! form. There is no automatic reconnect; the owner decides when to start
//! again.

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::bluetooth::{RadioEvent, RadioHandle, RadioRequest};
use crate::config::LinkConfig;
use crate::timer::{earliest, sleep_until_opt};
use crate::types::{LinkEvent, LinkState, LinkStatus, PeerId, SignalSample, TargetSelector};

/// Commands accepted by a running link manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Begin discovery for a badge matching the selector.
    Start(TargetSelector),
    /// Tear down whatever session exists. Answered with
    /// [`LinkEvent::Stopped`].
    Stop,
}

/// Single-peer session manager.
#[derive(Debug)]
pub struct LinkManager {
    config: LinkConfig,
    radio: RadioHandle,
    events: mpsc::UnboundedSender<LinkEvent>,
    status: watch::Sender<LinkStatus>,

    state: LinkState,
    powered: bool,
    busy: bool,
    selector: TargetSelector,
    peer: Option<PeerId>,
    characteristic: Option<Uuid>,
    scan_deadline: Option<Instant>,
    next_sample: Option<Instant>,
    read_outstanding: bool,
}

impl LinkManager {
    /// Create a manager with the adapter assumed off.
    ///
    /// Returns the manager and a receiver for its published status.
    #[must_use]
    pub fn new(
        config: LinkConfig,
        radio: RadioHandle,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> (Self, watch::Receiver<LinkStatus>) {
        let (status, status_rx) = watch::channel(LinkStatus::default());
        let manager = Self {
            config,
            radio,
            events,
            status,
            state: LinkState::AdapterOff,
            powered: false,
            busy: false,
            selector: TargetSelector::AnyBadge,
            peer: None,
            characteristic: None,
            scan_deadline: None,
            next_sample: None,
            read_outstanding: false,
        };
        (manager, status_rx)
    }

    /// Current link state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Whether a start is in progress or a session is up.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// The connected (or connecting) peer.
    #[must_use]
    pub const fn peer(&self) -> Option<&PeerId> {
        self.peer.as_ref()
    }

    /// The next scan timeout or sampling tick, whichever comes first.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        earliest(self.scan_deadline, self.next_sample)
    }

    /// Begin discovery for the badge service.
    ///
    /// Ignored while the adapter is off or another start is in progress.
    pub fn start(&mut self, selector: TargetSelector, now: Instant) {
        if !self.powered {
            warn!("Adapter is not powered on, ignoring start");
            return;
        }
        if self.busy {
            debug!(state = ?self.state, "Busy, ignoring start");
            return;
        }
        info!(?selector, service = %self.config.service_uuid, "Starting discovery");

        self.busy = true;
        self.selector = selector;
        self.radio.submit(RadioRequest::StopScan);
        self.scan_deadline = now.checked_add(self.config.scan_timeout);
        if self.scan_deadline.is_none() {
            warn!(
                timeout = ?self.config.scan_timeout,
                "Scan timeout out of clock range, scan will not time out"
            );
        }
        self.radio.submit(RadioRequest::StartScan {
            service: self.config.service_uuid,
        });
        self.set_state(LinkState::Scanning);
    }

    /// Tear down the session. Safe to call at any time.
    pub fn stop(&mut self) {
        if !self.busy && self.peer.is_none() {
            trace!("Already stopped");
            return;
        }
        info!(state = ?self.state, "Stopping link");

        if self.state == LinkState::Scanning {
            self.radio.submit(RadioRequest::StopScan);
        }
        self.scan_deadline = None;
        self.cancel_sampling();
        if let Some(peer) = self.peer.take() {
            info!(%peer, "Disconnecting");
            self.radio.submit(RadioRequest::Disconnect { peer });
        }
        self.characteristic = None;
        self.busy = false;
        if self.state.is_active() {
            self.set_state(LinkState::Idle);
        }
    }

    /// Fire the scan timeout and the sampling tick if they are due.
    pub fn poll_deadlines(&mut self, now: Instant) {
        if self.scan_deadline.is_some_and(|deadline| now >= deadline) {
            self.on_scan_timeout();
        }
        if let Some(due) = self.next_sample {
            if now >= due {
                self.on_sample_tick(due, now);
            }
        }
    }

    /// React to one completion or notification from the radio backend.
    pub fn handle_radio_event(&mut self, event: RadioEvent, now: Instant) {
        match event {
            RadioEvent::PowerChanged(on) => self.on_power_changed(on),
            RadioEvent::Discovered { peer, rssi } => self.on_discovered(peer, rssi),
            RadioEvent::Connected { peer } => {
                if !self.is_current(&peer) {
                    return;
                }
                info!(%peer, "Connected, discovering services");
                self.radio.submit(RadioRequest::DiscoverServices {
                    peer,
                    service: self.config.service_uuid,
                });
            }
            RadioEvent::ConnectFailed { peer, error } => {
                if self.is_current(&peer) {
                    warn!(%peer, %error, "Connection failed");
                    self.invalidate_session("connection failed");
                }
            }
            RadioEvent::Disconnected { peer } => {
                if self.is_current(&peer) {
                    warn!(%peer, "Peer disconnected");
                    self.invalidate_session("peer disconnected");
                }
            }
            RadioEvent::ServicesInvalidated { peer } => {
                if self.is_current(&peer) {
                    warn!(%peer, "Peer services changed");
                    self.radio.submit(RadioRequest::Disconnect { peer });
                    self.invalidate_session("services invalidated");
                }
            }
            RadioEvent::ServicesDiscovered { peer, result } => {
                if !self.is_current(&peer) {
                    return;
                }
                match result {
                    Ok(services) if services.contains(&self.config.service_uuid) => {
                        debug!(%peer, count = services.len(), "Services discovered");
                        self.radio.submit(RadioRequest::DiscoverCharacteristics {
                            peer,
                            service: self.config.service_uuid,
                        });
                    }
                    Ok(_) => warn!(%peer, "Badge service not present on peer"),
                    Err(error) => warn!(%peer, %error, "Service discovery failed"),
                }
            }
            RadioEvent::CharacteristicsDiscovered {
                peer,
                service,
                result,
            } => self.on_characteristics(peer, service, result, now),
            RadioEvent::Subscribed {
                peer,
                characteristic,
                result,
            } => {
                if !self.is_current(&peer) {
                    return;
                }
                match result {
                    Ok(()) => debug!(%peer, %characteristic, "Notifications enabled"),
                    Err(error) => {
                        warn!(%peer, %error, "Subscription failed, sampling continues");
                    }
                }
            }
            RadioEvent::Notification { peer, value } => {
                trace!(%peer, len = value.len(), "Characteristic notification");
            }
            RadioEvent::RssiRead { peer, result } => self.on_rssi(&peer, result),
        }
        self.publish();
    }

    /// Run the manager until its command channel closes or the backend stops.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<LinkCommand>,
        mut radio_events: mpsc::UnboundedReceiver<RadioEvent>,
    ) {
        info!("Link manager started");
        loop {
            let deadline = self.deadline();
            tokio::select! {
                biased;
                event = radio_events.recv() => {
                    let Some(event) = event else {
                        warn!("Radio backend stopped");
                        break;
                    };
                    self.handle_radio_event(event, Instant::now());
                }
                command = commands.recv() => match command {
                    Some(LinkCommand::Start(selector)) => self.start(selector, Instant::now()),
                    Some(LinkCommand::Stop) => {
                        self.stop();
                        self.emit(LinkEvent::Stopped);
                    }
                    None => break,
                },
                () = sleep_until_opt(deadline) => self.poll_deadlines(Instant::now()),
            }
        }
        self.stop();
        info!("Link manager stopped");
    }

    fn on_power_changed(&mut self, on: bool) {
        if on == self.powered {
            return;
        }
        self.powered = on;
        if on {
            info!("Adapter powered on");
            self.set_state(LinkState::AdapterOn);
            self.emit(LinkEvent::AdapterReady);
        } else {
            warn!("Adapter powered off");
            if self.busy || self.peer.is_some() {
                self.invalidate_session("adapter powered off");
            }
            self.set_state(LinkState::AdapterOff);
        }
    }

    fn on_discovered(&mut self, peer: PeerId, rssi: Option<i16>) {
        if self.state != LinkState::Scanning || self.peer.is_some() {
            trace!(%peer, "Discovery outside of a scan, ignoring");
            return;
        }
        if !self.selector.matches(&peer) {
            debug!(%peer, "Peer does not match selector, ignoring");
            return;
        }
        info!(%peer, ?rssi, "Badge discovered, connecting");

        self.scan_deadline = None;
        self.radio.submit(RadioRequest::StopScan);
        self.peer = Some(peer.clone());
        self.radio.submit(RadioRequest::Connect { peer });
        self.set_state(LinkState::Connecting);
    }

    fn on_characteristics(
        &mut self,
        peer: PeerId,
        service: Uuid,
        result: crate::bluetooth::LinkResult<Vec<Uuid>>,
        now: Instant,
    ) {
        if !self.is_current(&peer) || self.characteristic.is_some() {
            return;
        }
        let characteristics = match result {
            Ok(characteristics) => characteristics,
            Err(error) => {
                warn!(%peer, %service, %error, "Characteristic discovery failed");
                return;
            }
        };
        let wanted = self.config.characteristic_uuid;
        if !characteristics.contains(&wanted) {
            warn!(%peer, %service, "Badge characteristic not present");
            return;
        }

        info!(%peer, characteristic = %wanted, "Subscribing and starting signal sampling");
        self.characteristic = Some(wanted);
        self.radio.submit(RadioRequest::Subscribe {
            peer,
            service,
            characteristic: wanted,
        });
        self.next_sample = now.checked_add(self.config.sample_interval);
        if self.next_sample.is_none() {
            warn!(
                interval = ?self.config.sample_interval,
                "Sample interval out of clock range, not sampling"
            );
        }
        self.set_state(LinkState::Subscribed);
    }

    fn on_sample_tick(&mut self, due: Instant, now: Instant) {
        let interval = self.config.sample_interval;
        self.next_sample = due
            .checked_add(interval)
            .filter(|next| *next > now)
            .or_else(|| now.checked_add(interval));

        let Some(peer) = self.peer.clone() else {
            return;
        };
        if !self.powered {
            return;
        }
        if self.read_outstanding {
            debug!(%peer, "RSSI read still outstanding, skipping tick");
            self.read_outstanding = false;
            return;
        }
        self.read_outstanding = true;
        self.radio.submit(RadioRequest::ReadRssi { peer });
    }

    fn on_rssi(&mut self, peer: &PeerId, result: crate::bluetooth::LinkResult<i16>) {
        if !self.is_current(peer) {
            return;
        }
        self.read_outstanding = false;
        match result {
            Ok(rssi) if self.powered && self.state == LinkState::Subscribed => {
                debug!(%peer, rssi, "RSSI read");
                self.emit(LinkEvent::Sample(SignalSample::now(rssi)));
            }
            Ok(rssi) => trace!(%peer, rssi, "Dropping sample outside of a session"),
            Err(error) => debug!(%peer, %error, "RSSI read failed, dropping sample"),
        }
    }

    fn on_scan_timeout(&mut self) {
        info!(
            after_secs = self.config.scan_timeout.as_secs_f64(),
            "Scan timed out without finding the badge"
        );
        self.scan_deadline = None;
        self.radio.submit(RadioRequest::StopScan);
        self.busy = false;
        self.set_state(LinkState::Idle);
        self.emit(LinkEvent::ScanTimedOut);
        self.publish();
    }

    fn invalidate_session(&mut self, reason: &str) {
        warn!(reason, state = ?self.state, "Session invalidated");
        self.scan_deadline = None;
        self.cancel_sampling();
        self.peer = None;
        self.characteristic = None;
        self.busy = false;
        self.set_state(LinkState::Idle);
        self.emit(LinkEvent::LinkLost);
    }

    fn cancel_sampling(&mut self) {
        self.next_sample = None;
        self.read_outstanding = false;
    }

    fn is_current(&self, peer: &PeerId) -> bool {
        let current = self.peer.as_ref() == Some(peer);
        if !current {
            trace!(%peer, "Event for an inactive peer, ignoring");
        }
        current
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Link state changed");
            self.state = state;
        }
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(LinkStatus {
            state: self.state,
            busy: self.busy,
            powered: self.powered,
        });
    }

    fn emit(&self, event: LinkEvent) {
        if self.events.send(event).is_err() {
            debug!("Link event receiver dropped");
        }
    }
}
