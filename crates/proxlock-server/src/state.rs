//! Application state shared across handlers.

use std::path::PathBuf;
use std::sync::Arc;

use proxlock_core::{Config, ConfigResult, TrackerHandle};
use tokio::sync::RwLock;

/// Shared application state, as handed to axum.
pub type SharedState = Arc<RwLock<AppState>>;

/// Radio backend the tracker was started on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioBackend {
    /// BlueZ over D-Bus.
    Bluez,
    /// In-process simulated badge.
    Simulated,
    /// Nothing serves radio requests; the adapter stays off.
    Detached,
}

impl RadioBackend {
    /// Name used in status responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Bluez => "bluez",
            Self::Simulated => "simulated",
            Self::Detached => "detached",
        }
    }
}

/// Application state.
#[derive(Debug)]
pub struct AppState {
    /// Loaded configuration.
    pub config: Config,
    /// Where `config` is persisted.
    pub config_path: PathBuf,
    /// Handle to the running proximity tracker.
    pub tracker: TrackerHandle,
    /// Backend serving the tracker's radio requests.
    pub radio: RadioBackend,
}

impl AppState {
    /// Create shared state.
    #[must_use]
    pub fn new(
        config: Config,
        config_path: PathBuf,
        tracker: TrackerHandle,
        radio: RadioBackend,
    ) -> SharedState {
        Arc::new(RwLock::new(Self {
            config,
            config_path,
            tracker,
            radio,
        }))
    }

    /// Persist the current configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_config(&self) -> ConfigResult<()> {
        self.config.save(&self.config_path)
    }
}
