//! Proximity state machine.
//!
//! Turns the signal-sample / link-lost stream into a position on the lock
//! ladder: `Idle → Searching → Unlocked → LockedShort → LockedLong → Idle`.
//!
//! The machine is synchronous and owns no tasks. Time is passed in by the
//! caller, and the single pending deadline is exposed through
//! [`ProximityMachine::deadline`] for the owning event loop to sleep on.
//! Every deadline carries a generation number; a transition bumps the
//! generation before arming anything new, so an elapsed deadline from an
//! earlier state is recognised and dropped.
//!
//! Each transition runs in a fixed order: cancel the pending timer, write the
//! new state, arm the timer for the new state, and hand the [`Transition`]
//! back to the caller for notification.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::config::ProximityConfig;
use crate::types::ProximityState;

/// The one outstanding deadline of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    /// Identifies this arming. Elapse notices must quote it.
    pub generation: u64,
    /// State entered when the deadline passes.
    pub target: ProximityState,
    /// Length the timer was armed with.
    pub duration: Duration,
    /// When it fires.
    pub deadline: Instant,
}

/// A state change produced by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State left.
    pub from: ProximityState,
    /// State entered.
    pub to: ProximityState,
}

/// Ladder state machine for a single tracked badge.
#[derive(Debug)]
pub struct ProximityMachine {
    config: ProximityConfig,
    state: ProximityState,
    timer: Option<PendingTimer>,
    generation: u64,
    double_arm_attempts: u64,
}

impl ProximityMachine {
    /// Create a machine in `Idle` with no timer.
    #[must_use]
    pub const fn new(config: ProximityConfig) -> Self {
        Self {
            config,
            state: ProximityState::Idle,
            timer: None,
            generation: 0,
            double_arm_attempts: 0,
        }
    }

    /// Current ladder position.
    #[must_use]
    pub const fn state(&self) -> ProximityState {
        self.state
    }

    /// Thresholds and timeouts in use.
    #[must_use]
    pub const fn config(&self) -> &ProximityConfig {
        &self.config
    }

    /// The pending deadline, if any.
    #[must_use]
    pub const fn pending_timer(&self) -> Option<&PendingTimer> {
        self.timer.as_ref()
    }

    /// When the pending timer fires, if one is armed.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.timer.as_ref().map(|t| t.deadline)
    }

    /// How often a timer was armed while another was still pending.
    ///
    /// Every transition cancels first, so this stays zero.
    #[must_use]
    pub const fn double_arm_attempts(&self) -> u64 {
        self.double_arm_attempts
    }

    /// Start looking for the badge. Only valid from `Idle` with a free link.
    pub fn begin_search(&mut self, link_busy: bool, now: Instant) -> Option<Transition> {
        if self.state != ProximityState::Idle {
            debug!(state = %self.state, "Already tracking, ignoring search request");
            return None;
        }
        if link_busy {
            debug!("Link is busy, ignoring search request");
            return None;
        }
        Some(self.transition(ProximityState::Searching, now))
    }

    /// Drop to `Idle` from anywhere.
    pub fn force_idle(&mut self, now: Instant) -> Option<Transition> {
        if self.state == ProximityState::Idle {
            self.cancel_timer();
            return None;
        }
        Some(self.transition(ProximityState::Idle, now))
    }

    /// Evaluate one signal strength reading.
    pub fn on_sample(&mut self, rssi: i16, now: Instant) -> Option<Transition> {
        let near = self.config.is_above_threshold(rssi);
        trace!(rssi, near, state = %self.state, "Signal sample");

        match self.state {
            ProximityState::Idle | ProximityState::LockedLong => None,
            ProximityState::Searching | ProximityState::LockedShort => {
                near.then(|| self.transition(ProximityState::Unlocked, now))
            }
            ProximityState::Unlocked => {
                if near {
                    self.cancel_timer();
                    None
                } else {
                    self.start_grace(now)
                }
            }
        }
    }

    /// The link dropped. Every tracking state falls back to `Idle`.
    pub fn on_link_lost(&mut self, now: Instant) -> Option<Transition> {
        if self.state == ProximityState::Idle {
            return None;
        }
        info!(state = %self.state, "Link lost");
        Some(self.transition(ProximityState::Idle, now))
    }

    /// A deadline armed with `generation` has passed.
    ///
    /// Stale generations are ignored.
    pub fn on_timer_elapsed(&mut self, generation: u64, now: Instant) -> Option<Transition> {
        match self.timer {
            Some(timer) if timer.generation == generation => {
                self.timer = None;
                info!(
                    from = %self.state,
                    to = %timer.target,
                    after_secs = timer.duration.as_secs_f64(),
                    "Timed out"
                );
                Some(self.transition(timer.target, now))
            }
            _ => {
                debug!(generation, "Ignoring stale timer");
                None
            }
        }
    }

    /// Fire the pending timer if its deadline has passed.
    pub fn poll_timer(&mut self, now: Instant) -> Option<Transition> {
        let timer = self.timer?;
        if now < timer.deadline {
            return None;
        }
        self.on_timer_elapsed(timer.generation, now)
    }

    fn start_grace(&mut self, now: Instant) -> Option<Transition> {
        if self.timer.is_some() {
            trace!("Grace timer already running");
            return None;
        }
        let grace = self.config.unlocked_to_locked_short;
        if grace.is_zero() {
            return Some(self.transition(ProximityState::LockedShort, now));
        }
        self.arm(grace, ProximityState::LockedShort, now);
        None
    }

    fn transition(&mut self, to: ProximityState, now: Instant) -> Transition {
        let from = self.state;
        self.cancel_timer();
        self.state = to;
        info!(%from, %to, "Proximity state changed");

        match to {
            ProximityState::Searching => {
                self.arm(self.config.search_timeout, ProximityState::Idle, now);
            }
            ProximityState::LockedShort => self.arm(
                self.config.locked_short_to_locked_long,
                ProximityState::LockedLong,
                now,
            ),
            ProximityState::LockedLong => {
                self.arm(self.config.locked_long_to_idle, ProximityState::Idle, now);
            }
            ProximityState::Idle | ProximityState::Unlocked => {}
        }

        Transition { from, to }
    }

    fn arm(&mut self, duration: Duration, target: ProximityState, now: Instant) {
        debug_assert!(self.timer.is_none(), "timer armed while another is pending");
        if self.timer.is_some() {
            self.double_arm_attempts += 1;
            error!(state = %self.state, %target, "Refusing to arm a second timer");
            return;
        }
        let Some(deadline) = now.checked_add(duration) else {
            error!(
                state = %self.state,
                %target,
                ?duration,
                "Timeout out of clock range, not arming"
            );
            return;
        };
        self.generation += 1;
        debug!(
            generation = self.generation,
            state = %self.state,
            %target,
            secs = duration.as_secs_f64(),
            "Timer armed"
        );
        self.timer = Some(PendingTimer {
            generation: self.generation,
            target,
            duration,
            deadline,
        });
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            debug!(
                generation = timer.generation,
                target = %timer.target,
                "Timer cancelled"
            );
        }
    }
}
