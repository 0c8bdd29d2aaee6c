//! Unified error types for the proxlock core library.
//!
//! This module provides a unified error type [`ProxlockError`] covering the
//! failure modes that can reach a caller. Each module also has its own
//! specific error type ([`ConfigError`](crate::config::ConfigError),
//! [`LinkError`](crate::bluetooth::LinkError)) for internal use.
//!
//! Radio failures during a tracking session never surface here: the link
//! manager turns them into dropped samples or a `LinkLost` event. Only setup
//! failures (no adapter, no D-Bus session) and command failures are typed.
//!
//! # Example
//!
//! ```rust
//! use proxlock_core::error::{ProxlockError, Result};
//! use std::path::PathBuf;
//!
//! fn require_config(path: &PathBuf) -> Result<()> {
//!     if !path.exists() {
//!         return Err(ProxlockError::ConfigNotFound(path.clone()));
//!     }
//!     Ok(())
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all proxlock operations.
#[derive(Debug, Error)]
pub enum ProxlockError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// The Bluetooth stack could not be reached.
    #[error("Bluetooth session failed: {0}")]
    BluetoothSessionFailed(String),

    /// A radio operation failed.
    #[error("Bluetooth operation failed: {0}")]
    BluetoothOperationFailed(String),

    // =========================================================================
    // TRACKER ERRORS
    // =========================================================================
    /// The tracker task is no longer running.
    #[error("Proximity tracker is not running")]
    TrackerUnavailable,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while reading or writing a file.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for proxlock operations.
pub type Result<T> = std::result::Result<T, ProxlockError>;

/// Short alias for [`ProxlockError`].
pub type Error = ProxlockError;

impl ProxlockError {
    /// Returns `true` if this error is related to Bluetooth operations.
    #[inline]
    #[must_use]
    pub const fn is_bluetooth_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::BluetoothSessionFailed(_)
                | Self::BluetoothOperationFailed(_)
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to I/O or persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_) | Self::IoError(_))
    }

    /// Returns `true` if this error is likely recoverable without user intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterPoweredOff | Self::BluetoothOperationFailed(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::ConfigNotFound(_) => 404,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::PersistenceError(_) | Self::IoError(_) => 500,

            // 503 Service Unavailable - Bluetooth hardware or tracker issues
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::BluetoothSessionFailed(_)
            | Self::BluetoothOperationFailed(_)
            | Self::TrackerUnavailable => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::BluetoothSessionFailed(_) => "BLUETOOTH_SESSION_FAILED",
            Self::BluetoothOperationFailed(_) => "BLUETOOTH_OPERATION_FAILED",
            Self::TrackerUnavailable => "TRACKER_UNAVAILABLE",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for ProxlockError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path.into()),
            ConfigError::ReadError { path, source } => {
                Self::PersistenceError(format!("Failed to read {path}: {source}"))
            }
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::bluetooth::LinkError> for ProxlockError {
    fn from(err: crate::bluetooth::LinkError) -> Self {
        use crate::bluetooth::LinkError;
        match err {
            LinkError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            LinkError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            LinkError::SessionInitFailed { message } => Self::BluetoothSessionFailed(message),
            other => Self::BluetoothOperationFailed(other.to_string()),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bluetooth::LinkError;
    use crate::config::ConfigError;
    use std::io::{Error as IoErr, ErrorKind};

    #[test]
    fn test_bluetooth_error_classification() {
        assert!(ProxlockError::BluetoothAdapterNotFound.is_bluetooth_error());
        assert!(ProxlockError::BluetoothAdapterPoweredOff.is_bluetooth_error());
        assert!(ProxlockError::BluetoothSessionFailed("dbus".into()).is_bluetooth_error());
        assert!(ProxlockError::BluetoothOperationFailed("read".into()).is_bluetooth_error());

        assert!(!ProxlockError::TrackerUnavailable.is_bluetooth_error());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(ProxlockError::ConfigNotFound(PathBuf::from("/test")).is_config_error());
        assert!(ProxlockError::ConfigParseError("syntax error".into()).is_config_error());
        assert!(ProxlockError::ConfigValidationError("invalid value".into()).is_config_error());

        assert!(!ProxlockError::BluetoothAdapterNotFound.is_config_error());
    }

    #[test]
    fn test_io_error_classification() {
        assert!(ProxlockError::PersistenceError("disk full".into()).is_io_error());
        assert!(ProxlockError::IoError(IoErr::new(ErrorKind::NotFound, "test")).is_io_error());

        assert!(!ProxlockError::BluetoothAdapterNotFound.is_io_error());
    }

    #[test]
    fn test_recoverable_errors() {
        assert!(ProxlockError::BluetoothAdapterPoweredOff.is_recoverable());
        assert!(ProxlockError::BluetoothOperationFailed("timeout".into()).is_recoverable());
        assert!(!ProxlockError::BluetoothAdapterNotFound.is_recoverable());
        assert!(!ProxlockError::TrackerUnavailable.is_recoverable());
    }

    #[test]
    fn test_http_status_codes() {
        assert_eq!(
            ProxlockError::ConfigNotFound(PathBuf::new()).http_status_code(),
            404
        );
        assert_eq!(
            ProxlockError::ConfigParseError("error".into()).http_status_code(),
            422
        );
        assert_eq!(
            ProxlockError::PersistenceError("error".into()).http_status_code(),
            500
        );
        assert_eq!(
            ProxlockError::BluetoothAdapterNotFound.http_status_code(),
            503
        );
        assert_eq!(ProxlockError::TrackerUnavailable.http_status_code(), 503);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ProxlockError::BluetoothAdapterNotFound.error_code(),
            "BLUETOOTH_ADAPTER_NOT_FOUND"
        );
        assert_eq!(
            ProxlockError::TrackerUnavailable.error_code(),
            "TRACKER_UNAVAILABLE"
        );
        assert_eq!(
            ProxlockError::ConfigNotFound(PathBuf::new()).error_code(),
            "CONFIG_NOT_FOUND"
        );
    }

    #[test]
    fn test_from_config_error() {
        let err: ProxlockError = ConfigError::ValidationError {
            field: "proximity.max_rssi".into(),
            message: "must be above threshold_rssi".into(),
        }
        .into();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("proximity.max_rssi"));
    }

    #[test]
    fn test_from_link_error() {
        let err: ProxlockError = LinkError::AdapterNotFound.into();
        assert!(matches!(err, ProxlockError::BluetoothAdapterNotFound));

        let err: ProxlockError = LinkError::RssiUnavailable.into();
        assert!(matches!(err, ProxlockError::BluetoothOperationFailed(_)));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoErr::new(ErrorKind::NotFound, "file not found");
        let err: ProxlockError = io_err.into();
        assert!(matches!(err, ProxlockError::IoError(_)));
        assert!(err.is_io_error());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ProxlockError>();
        assert_sync::<ProxlockError>();
    }
}
