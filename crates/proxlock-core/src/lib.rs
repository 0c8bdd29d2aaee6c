//! # proxlock-core
//!
//! Core logic for the proxlock badge proximity lock.
//!
//! This crate provides:
//! - A link manager that keeps one Bluetooth LE session to a badge and samples its signal strength
//! - A proximity state machine that turns the samples into a lock state
//! - A tracker composing the two behind a cloneable handle
//! - Configuration loading and validation
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`bluetooth`] - Radio seam (requests/events) and the BlueZ and simulated backends
//! - [`link`] - Single-peer session management and RSSI sampling
//! - [`proximity`] - `Idle → Searching → Unlocked → LockedShort → LockedLong` ladder
//! - [`tracker`] - Event loop wiring the link manager to the state machine
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod bluetooth;
pub mod config;
pub mod error;
pub mod link;
pub mod proximity;
pub mod timer;
pub mod tracker;
pub mod types;

// Re-export primary types for convenience
pub use bluetooth::{LinkError, LinkResult, RadioEvent, RadioHandle, RadioRequest};
pub use config::{
    is_valid_mac_address, Config, ConfigError, ConfigResult, LinkConfig, LoggingConfig,
    ProximityConfig, ServerConfig,
};
pub use error::{Error, ProxlockError, Result};
pub use link::{LinkCommand, LinkManager};
pub use proximity::{PendingTimer, ProximityMachine, Transition};
pub use tracker::{PendingTimeout, TrackerHandle, TrackerSnapshot};
pub use types::{
    LinkEvent, LinkState, LinkStatus, PeerId, ProximityState, SignalSample, StateChange,
    TargetSelector, TrackerEvent,
};
