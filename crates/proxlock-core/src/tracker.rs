//! Proximity tracker: the link manager and the state machine wired together.
//!
//! [`spawn`] starts two tasks. The link manager task owns the radio session;
//! the driver task owns the [`ProximityMachine`], feeds it link events in the
//! order the link observed them, and carries out what each new state asks of
//! the link (`Searching` starts it, `Idle` stops it). Consumers talk to the
//! driver through a cloneable [`TrackerHandle`].
//!
//! The driver also keeps a search alive across short scans: whenever the
//! link reports `AdapterReady` or `ScanTimedOut` while the machine is still
//! `Searching`, it starts the link again. The search window itself is owned
//! by the machine's search timeout.
//!
//! A search is refused while the adapter is off. Every `Stop` sent to the
//! link is acknowledged with `LinkEvent::Stopped`; session events that
//! arrive before the acknowledgement belong to the stopped session and are
//! dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::bluetooth::{RadioEvent, RadioHandle};
use crate::config::Config;
use crate::error::{ProxlockError, Result};
use crate::link::{LinkCommand, LinkManager};
use crate::proximity::{ProximityMachine, Transition};
use crate::timer::sleep_until_opt;
use crate::types::{
    LinkEvent, LinkStatus, PeerId, ProximityState, SignalSample, StateChange, TargetSelector,
    TrackerEvent,
};

const COMMAND_BUFFER: usize = 32;
const EVENT_BUFFER: usize = 64;

/// The ladder timeout currently counting down.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
pub struct PendingTimeout {
    /// State entered when the timeout fires.
    pub target: ProximityState,

    /// Length the timeout was armed with, in seconds.
    pub duration_secs: f64,

    /// When the timeout fires (UTC).
    pub fires_at_utc: DateTime<Utc>,
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TrackerSnapshot {
    /// Position on the lock ladder.
    pub proximity_state: ProximityState,

    /// Link manager status.
    pub link: LinkStatus,

    /// Badge address the next search is limited to, if any.
    pub target_address: Option<PeerId>,

    /// Most recent signal sample.
    pub last_sample: Option<SignalSample>,

    /// Most recent sample mapped onto `[0, 1]` between the display bounds.
    #[schema(example = 0.6)]
    pub signal_fraction: Option<f64>,

    /// Pending ladder timeout.
    pub pending_timeout: Option<PendingTimeout>,

    /// When this snapshot was taken (UTC).
    pub updated_at_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TrackerCommand {
    StartTracking(TargetSelector),
    StopTracking,
    BeginSearch,
    ForceIdle,
}

#[derive(Debug)]
struct Request {
    command: TrackerCommand,
    reply: oneshot::Sender<TrackerSnapshot>,
}

/// Cloneable handle to a running tracker.
///
/// The tracker shuts down once every handle has been dropped.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Request>,
    events: broadcast::Sender<TrackerEvent>,
    snapshot: watch::Receiver<TrackerSnapshot>,
    link_status: watch::Receiver<LinkStatus>,
}

impl TrackerHandle {
    /// Set the badge selector and begin searching.
    ///
    /// Ignored unless the tracker is idle.
    ///
    /// # Errors
    ///
    /// Returns [`ProxlockError::TrackerUnavailable`] if the tracker stopped.
    pub async fn start_tracking(&self, selector: TargetSelector) -> Result<TrackerSnapshot> {
        self.request(TrackerCommand::StartTracking(selector)).await
    }

    /// Stop tracking and release the link. Safe when already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ProxlockError::TrackerUnavailable`] if the tracker stopped.
    pub async fn stop_tracking(&self) -> Result<TrackerSnapshot> {
        self.request(TrackerCommand::StopTracking).await
    }

    /// Begin searching with the current selector. No-op outside `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxlockError::TrackerUnavailable`] if the tracker stopped.
    pub async fn begin_search(&self) -> Result<TrackerSnapshot> {
        self.request(TrackerCommand::BeginSearch).await
    }

    /// Drop to `Idle` from any state.
    ///
    /// # Errors
    ///
    /// Returns [`ProxlockError::TrackerUnavailable`] if the tracker stopped.
    pub async fn force_idle(&self) -> Result<TrackerSnapshot> {
        self.request(TrackerCommand::ForceIdle).await
    }

    /// Subscribe to state changes and link-lost notices.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Latest snapshot, with the link status as of now.
    #[must_use]
    pub fn snapshot(&self) -> TrackerSnapshot {
        let mut snapshot = self.snapshot.borrow().clone();
        snapshot.link = *self.link_status.borrow();
        snapshot
    }

    /// Current link manager status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        *self.link_status.borrow()
    }

    /// Whether the tracker task still accepts commands.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    async fn request(&self, command: TrackerCommand) -> Result<TrackerSnapshot> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Request { command, reply })
            .await
            .map_err(|_| ProxlockError::TrackerUnavailable)?;
        response.await.map_err(|_| ProxlockError::TrackerUnavailable)
    }
}

/// Start a tracker on top of a radio backend.
///
/// `radio` and `radio_events` are the link manager's ends of the channels
/// returned by [`crate::bluetooth::channel`].
pub fn spawn(
    config: &Config,
    radio: RadioHandle,
    radio_events: mpsc::UnboundedReceiver<RadioEvent>,
) -> TrackerHandle {
    let (link_event_tx, link_events) = mpsc::unbounded_channel();
    let (link_command_tx, link_commands) = mpsc::unbounded_channel();
    let (manager, link_status) = LinkManager::new(config.link.clone(), radio, link_event_tx);
    tokio::spawn(manager.run(link_commands, radio_events));

    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
    let driver = Driver::new(config, link_command_tx, link_status.clone(), event_tx.clone());
    let snapshot = driver.snapshot.subscribe();
    driver.publish();

    let (command_tx, commands) = mpsc::channel(COMMAND_BUFFER);
    tokio::spawn(driver.run(commands, link_events));

    info!(
        threshold_rssi = config.proximity.threshold_rssi,
        "Proximity tracker started"
    );
    TrackerHandle {
        commands: command_tx,
        events: event_tx,
        snapshot,
        link_status,
    }
}

fn initial_snapshot() -> TrackerSnapshot {
    TrackerSnapshot {
        proximity_state: ProximityState::Idle,
        link: LinkStatus::default(),
        target_address: None,
        last_sample: None,
        signal_fraction: None,
        pending_timeout: None,
        updated_at_utc: Utc::now(),
    }
}

struct Driver {
    machine: ProximityMachine,
    selector: TargetSelector,
    link: mpsc::UnboundedSender<LinkCommand>,
    link_status: watch::Receiver<LinkStatus>,
    /// A start was issued and has not been followed by a stop, loss or
    /// scan timeout.
    link_active: bool,
    /// Stops sent to the link and not yet acknowledged. Session events
    /// arriving meanwhile are stale.
    pending_stops: u32,
    events: broadcast::Sender<TrackerEvent>,
    snapshot: watch::Sender<TrackerSnapshot>,
    last_sample: Option<SignalSample>,
}

impl Driver {
    fn new(
        config: &Config,
        link: mpsc::UnboundedSender<LinkCommand>,
        link_status: watch::Receiver<LinkStatus>,
        events: broadcast::Sender<TrackerEvent>,
    ) -> Self {
        let selector = config
            .link
            .target_address
            .as_deref()
            .map_or(TargetSelector::AnyBadge, |address| {
                TargetSelector::Address(PeerId::new(address))
            });
        Self {
            machine: ProximityMachine::new(config.proximity),
            selector,
            link,
            link_status,
            link_active: false,
            pending_stops: 0,
            events,
            snapshot: watch::Sender::new(initial_snapshot()),
            last_sample: None,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Request>,
        mut link_events: mpsc::UnboundedReceiver<LinkEvent>,
    ) {
        loop {
            let deadline = self.machine.deadline();
            tokio::select! {
                biased;
                event = link_events.recv() => {
                    let Some(event) = event else {
                        warn!("Link manager stopped");
                        break;
                    };
                    self.on_link_event(event, Instant::now());
                }
                request = commands.recv() => {
                    let Some(Request { command, reply }) = request else {
                        break;
                    };
                    self.on_command(command, Instant::now());
                    if reply.send(self.snapshot.borrow().clone()).is_err() {
                        debug!("Command caller went away before the reply");
                    }
                }
                () = sleep_until_opt(deadline) => {
                    let transition = self.machine.poll_timer(Instant::now());
                    self.apply(transition);
                }
            }
        }
        self.stop_link();
        info!("Proximity tracker stopped");
    }

    fn on_command(&mut self, command: TrackerCommand, now: Instant) {
        debug!(?command, state = %self.machine.state(), "Tracker command");
        let transition = match command {
            TrackerCommand::StartTracking(selector) => {
                if self.machine.state() == ProximityState::Idle {
                    self.selector = selector;
                }
                self.begin_search(now)
            }
            TrackerCommand::BeginSearch => self.begin_search(now),
            TrackerCommand::StopTracking | TrackerCommand::ForceIdle => {
                let transition = self.machine.force_idle(now);
                if transition.is_none() {
                    self.stop_link();
                }
                transition
            }
        };
        self.apply(transition);
    }

    fn begin_search(&mut self, now: Instant) -> Option<Transition> {
        let powered = self.link_status.borrow().powered;
        if !powered && self.machine.state() == ProximityState::Idle {
            info!("Adapter is off, not searching");
        }
        self.machine.begin_search(self.link_active || !powered, now)
    }

    fn on_link_event(&mut self, event: LinkEvent, now: Instant) {
        match event {
            LinkEvent::Stopped => {
                self.pending_stops = self.pending_stops.saturating_sub(1);
            }
            LinkEvent::Sample(_) | LinkEvent::LinkLost | LinkEvent::ScanTimedOut
                if self.pending_stops > 0 =>
            {
                debug!(?event, "Event from a stopped session, ignoring");
            }
            LinkEvent::AdapterReady => {
                if self.machine.state() == ProximityState::Searching {
                    info!("Adapter ready while searching, restarting discovery");
                    self.start_link();
                }
                self.publish();
            }
            LinkEvent::Sample(sample) => {
                self.last_sample = Some(sample);
                let transition = self.machine.on_sample(sample.rssi, now);
                self.apply(transition);
            }
            LinkEvent::LinkLost => {
                self.link_active = false;
                self.broadcast(TrackerEvent::LinkLost);
                let transition = self.machine.on_link_lost(now);
                self.apply(transition);
            }
            LinkEvent::ScanTimedOut => {
                self.link_active = false;
                if self.machine.state() == ProximityState::Searching {
                    debug!("Scan timed out inside the search window, scanning again");
                    self.start_link();
                }
                self.publish();
            }
        }
    }

    fn apply(&mut self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            self.publish();
            return;
        };
        match to {
            ProximityState::Searching => self.start_link(),
            ProximityState::Idle => {
                self.stop_link();
                self.last_sample = None;
            }
            ProximityState::Unlocked | ProximityState::LockedShort | ProximityState::LockedLong => {}
        }
        info!(%from, %to, "Proximity state changed");
        self.publish();
        self.broadcast(TrackerEvent::StateChanged(StateChange {
            from,
            to,
            changed_at_utc: Utc::now(),
        }));
    }

    fn start_link(&mut self) {
        self.link_active = true;
        self.send_link(LinkCommand::Start(self.selector.clone()));
    }

    fn stop_link(&mut self) {
        self.link_active = false;
        self.pending_stops += 1;
        self.send_link(LinkCommand::Stop);
    }

    fn send_link(&self, command: LinkCommand) {
        if self.link.send(command).is_err() {
            warn!("Link manager is gone, dropping command");
        }
    }

    fn broadcast(&self, event: TrackerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let config = self.machine.config();
        let now = Instant::now();
        let pending_timeout = self.machine.pending_timer().map(|timer| {
            let remaining = chrono::Duration::from_std(timer.deadline.saturating_duration_since(now))
                .unwrap_or_else(|_| chrono::Duration::zero());
            PendingTimeout {
                target: timer.target,
                duration_secs: timer.duration.as_secs_f64(),
                fires_at_utc: Utc::now() + remaining,
            }
        });
        let target_address = match &self.selector {
            TargetSelector::AnyBadge => None,
            TargetSelector::Address(peer) => Some(peer.clone()),
        };
        self.snapshot.send_replace(TrackerSnapshot {
            proximity_state: self.machine.state(),
            link: *self.link_status.borrow(),
            target_address,
            last_sample: self.last_sample,
            signal_fraction: self.last_sample.map(|s| config.signal_fraction(s.rssi)),
            pending_timeout,
            updated_at_utc: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::bluetooth::{self, simulated};
    use crate::types::ProximityState::{Idle, LockedLong, LockedShort, Searching, Unlocked};

    /// Tracker on a simulated badge, returned once the adapter is on.
    async fn start(
        profile: simulated::BadgeProfile,
    ) -> (TrackerHandle, simulated::SimulatedControl) {
        let (radio, requests, event_tx, event_rx) = bluetooth::channel();
        let (control, _badge) = simulated::spawn(profile, requests, event_tx);
        let handle = spawn(&Config::default(), radio, event_rx);
        wait_for_power(&handle, true).await;
        (handle, control)
    }

    async fn wait_for_power(handle: &TrackerHandle, powered: bool) {
        let mut status = handle.link_status.clone();
        status.wait_for(|s| s.powered == powered).await.unwrap();
    }

    /// Driver on bare channels with the adapter reported on.
    fn bare_driver() -> (Driver, mpsc::UnboundedReceiver<LinkCommand>) {
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (_status_tx, status) = watch::channel(LinkStatus {
            state: crate::types::LinkState::AdapterOn,
            busy: false,
            powered: true,
        });
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        (Driver::new(&Config::default(), link_tx, status, events), link_rx)
    }

    async fn next_state(events: &mut broadcast::Receiver<TrackerEvent>) -> ProximityState {
        loop {
            match events.recv().await.unwrap() {
                TrackerEvent::StateChanged(change) => return change.to,
                TrackerEvent::LinkLost => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_ladder_with_simulated_badge() {
        let (handle, badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        let snapshot = handle.begin_search().await.unwrap();
        assert_eq!(snapshot.proximity_state, Searching);
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Unlocked);

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.last_sample.map(|s| s.rssi), Some(-40));
        assert!(snapshot.signal_fraction.is_some());
        assert_eq!(snapshot.link.state, crate::types::LinkState::Subscribed);

        badge.set_rssi(-60);
        let weak_at = Instant::now();
        assert_eq!(next_state(&mut events).await, LockedShort);
        assert!(weak_at.elapsed() >= Duration::from_secs(5));

        let locked_at = Instant::now();
        assert_eq!(next_state(&mut events).await, LockedLong);
        assert!(locked_at.elapsed() >= Duration::from_secs(15));

        let long_at = Instant::now();
        assert_eq!(next_state(&mut events).await, Idle);
        assert!(long_at.elapsed() >= Duration::from_secs(20));

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.proximity_state, Idle);
        assert!(snapshot.pending_timeout.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_strong_sample_recovers_from_locked_short() {
        let (handle, badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        handle.begin_search().await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Unlocked);

        badge.set_rssi(-70);
        assert_eq!(next_state(&mut events).await, LockedShort);
        let pending = handle.snapshot().pending_timeout.unwrap();
        assert_eq!(pending.target, LockedLong);

        badge.set_rssi(-30);
        assert_eq!(next_state(&mut events).await, Unlocked);
        assert!(handle.snapshot().pending_timeout.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_badge_leaving_range_is_link_lost() {
        let (handle, badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        handle.begin_search().await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Unlocked);

        badge.set_in_range(false);
        assert_eq!(events.recv().await.unwrap(), TrackerEvent::LinkLost);
        assert_eq!(next_state(&mut events).await, Idle);
        assert!(handle.snapshot().last_sample.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_times_out_when_badge_is_absent() {
        let profile = simulated::BadgeProfile {
            in_range: false,
            ..simulated::BadgeProfile::default()
        };
        let (handle, _badge) = start(profile).await;
        let mut events = handle.subscribe();

        let started = Instant::now();
        handle.begin_search().await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Idle);
        assert!(started.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn test_badge_found_after_first_scan_window() {
        let profile = simulated::BadgeProfile {
            in_range: false,
            ..simulated::BadgeProfile::default()
        };
        let (handle, badge) = start(profile).await;
        let mut events = handle.subscribe();

        handle.begin_search().await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);

        // Past the 5s scan timeout but inside the 20s search window.
        tokio::time::sleep(Duration::from_secs(7)).await;
        badge.set_in_range(true);
        assert_eq!(next_state(&mut events).await, Unlocked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_selector_limits_search_to_address() {
        let (handle, _badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        let selector = TargetSelector::Address(PeerId::new("11:22:33:44:55:66"));
        let snapshot = handle.start_tracking(selector).await.unwrap();
        assert_eq!(
            snapshot.target_address,
            Some(PeerId::new("11:22:33:44:55:66"))
        );
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_tracking_releases_link() {
        let (handle, _badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        handle.start_tracking(TargetSelector::AnyBadge).await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Unlocked);

        let snapshot = handle.stop_tracking().await.unwrap();
        assert_eq!(snapshot.proximity_state, Idle);
        assert_eq!(next_state(&mut events).await, Idle);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.link_status().busy);

        // Stopping again is harmless and silent.
        let snapshot = handle.stop_tracking().await.unwrap();
        assert_eq!(snapshot.proximity_state, Idle);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_begin_search_outside_idle_is_ignored() {
        let (handle, _badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        handle.begin_search().await.unwrap();
        assert_eq!(next_state(&mut events).await, Searching);

        let snapshot = handle.begin_search().await.unwrap();
        assert_eq!(snapshot.proximity_state, Searching);
        let snapshot = handle
            .start_tracking(TargetSelector::Address(PeerId::new("11:22:33:44:55:66")))
            .await
            .unwrap();
        assert!(snapshot.target_address.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_idle_cancels_pending_timeout() {
        let (handle, _badge) = start(simulated::BadgeProfile {
            in_range: false,
            ..simulated::BadgeProfile::default()
        })
        .await;

        let snapshot = handle.begin_search().await.unwrap();
        assert_eq!(
            snapshot.pending_timeout.map(|t| t.target),
            Some(ProximityState::Idle)
        );

        let snapshot = handle.force_idle().await.unwrap();
        assert_eq!(snapshot.proximity_state, Idle);
        assert!(snapshot.pending_timeout.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_refused_while_adapter_off() {
        let (handle, badge) = start(simulated::BadgeProfile::default()).await;
        let mut events = handle.subscribe();

        badge.set_powered(false);
        wait_for_power(&handle, false).await;

        let snapshot = handle.begin_search().await.unwrap();
        assert_eq!(snapshot.proximity_state, Idle);
        assert!(snapshot.pending_timeout.is_none());
        let snapshot = handle.start_tracking(TargetSelector::AnyBadge).await.unwrap();
        assert_eq!(snapshot.proximity_state, Idle);
        assert!(events.try_recv().is_err());

        badge.set_powered(true);
        wait_for_power(&handle, true).await;
        let snapshot = handle.begin_search().await.unwrap();
        assert_eq!(snapshot.proximity_state, Searching);
        assert_eq!(next_state(&mut events).await, Searching);
        assert_eq!(next_state(&mut events).await, Unlocked);
    }

    #[test]
    fn test_events_before_stop_acknowledgement_are_stale() {
        let (mut driver, mut link) = bare_driver();
        let now = Instant::now();

        driver.on_command(TrackerCommand::BeginSearch, now);
        driver.on_command(TrackerCommand::ForceIdle, now);
        driver.on_command(TrackerCommand::BeginSearch, now);
        assert_eq!(driver.machine.state(), Searching);

        // Loss of the first session, reported before the link saw the stop.
        driver.on_link_event(LinkEvent::LinkLost, now);
        driver.on_link_event(LinkEvent::ScanTimedOut, now);
        assert_eq!(driver.machine.state(), Searching);
        assert!(driver.link_active);

        driver.on_link_event(LinkEvent::Stopped, now);
        driver.on_link_event(LinkEvent::LinkLost, now);
        assert_eq!(driver.machine.state(), Idle);

        let mut commands = Vec::new();
        while let Ok(command) = link.try_recv() {
            commands.push(command);
        }
        assert_eq!(
            commands,
            vec![
                LinkCommand::Start(TargetSelector::AnyBadge),
                LinkCommand::Stop,
                LinkCommand::Start(TargetSelector::AnyBadge),
                LinkCommand::Stop,
            ]
        );
    }

    #[test]
    fn test_begin_search_without_power_stays_idle() {
        let (link_tx, _link_rx) = mpsc::unbounded_channel();
        let (_status_tx, status) = watch::channel(LinkStatus::default());
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let mut driver = Driver::new(&Config::default(), link_tx, status, events);

        driver.on_command(TrackerCommand::BeginSearch, Instant::now());
        assert_eq!(driver.machine.state(), Idle);
        assert!(!driver.link_active);
    }

    #[tokio::test]
    async fn test_commands_fail_once_tracker_is_gone() {
        let (commands, receiver) = mpsc::channel(1);
        drop(receiver);
        let (events, _) = broadcast::channel(1);
        let (_snapshot_tx, snapshot) = watch::channel(initial_snapshot());
        let (_link_tx, link_status) = watch::channel(LinkStatus::default());
        let handle = TrackerHandle {
            commands,
            events,
            snapshot,
            link_status,
        };

        assert!(!handle.is_running());
        let err = handle.begin_search().await.unwrap_err();
        assert!(matches!(err, ProxlockError::TrackerUnavailable));
    }
}
