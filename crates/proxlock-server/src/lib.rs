//! # proxlock-server
//!
//! HTTP server library for the proxlock badge proximity lock.
//!
//! This library provides the API handlers, logging setup and shared state
//! around a [`proxlock_core::TrackerHandle`].

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
