//! Application configuration management.
//!
//! Handles loading, saving, and validating proxlock configuration including:
//! - Badge service and characteristic identifiers
//! - Scan timeout and signal sampling cadence
//! - RSSI thresholds and the lock ladder timeouts
//! - HTTP listen address
//! - Log filter and log file directory
//!
//! Configuration is read from an optional TOML file and then overridden by
//! `PROXLOCK__<SECTION>__<KEY>` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Badge GATT service identifier.
pub const BADGE_SERVICE_UUID: Uuid = Uuid::from_u128(0x1FE5_D02C_78AB_414D_AD97_1A4E_5297_227A);

/// Badge GATT characteristic identifier.
pub const BADGE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x8C88_1368_8C34_41FD_8BCC_AD7E_A408_B1EE);

/// Weakest signal shown on a strength display, in dBm.
pub const DEFAULT_MIN_RSSI: i16 = -80;
/// Strongest signal shown on a strength display, in dBm.
pub const DEFAULT_MAX_RSSI: i16 = -20;
/// Lock/unlock boundary, in dBm.
pub const DEFAULT_THRESHOLD_RSSI: i16 = -45;

/// Longest accepted timeout or interval.
pub const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Environment variable that overrides the configuration file path.
pub const CONFIG_PATH_ENV: &str = "PROXLOCK_CONFIG";

const ENV_PREFIX: &str = "PROXLOCK";

static MAC_ADDRESS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("valid regex"));

/// Errors that can occur while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    ReadError {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// Path that failed.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields hold invalid values.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Radio link settings.
    pub link: LinkConfig,

    /// Thresholds and ladder timeouts.
    pub proximity: ProximityConfig,

    /// HTTP server settings.
    pub server: ServerConfig,

    /// Log filter and file output.
    pub logging: LoggingConfig,
}

/// Radio link settings used by the link manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// GATT service the badge advertises.
    pub service_uuid: Uuid,

    /// GATT characteristic subscribed to once connected.
    pub characteristic_uuid: Uuid,

    /// How long discovery runs before giving up.
    #[serde(with = "duration_secs")]
    pub scan_timeout: Duration,

    /// Signal strength sampling cadence.
    #[serde(with = "duration_secs")]
    pub sample_interval: Duration,

    /// Only connect to this badge address, if set.
    pub target_address: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            service_uuid: BADGE_SERVICE_UUID,
            characteristic_uuid: BADGE_CHARACTERISTIC_UUID,
            scan_timeout: Duration::from_secs(5),
            sample_interval: Duration::from_secs(1),
            target_address: None,
        }
    }
}

/// Thresholds and ladder timeouts used by the proximity state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityConfig {
    /// Weakest signal shown on a strength display.
    pub min_rssi: i16,

    /// Strongest signal shown on a strength display.
    pub max_rssi: i16,

    /// Samples at or above this value count as "near".
    pub threshold_rssi: i16,

    /// How long `Searching` waits for a strong sample.
    #[serde(with = "duration_secs")]
    pub search_timeout: Duration,

    /// Grace period from the first weak sample in `Unlocked` to `LockedShort`.
    /// Zero degrades on the weak sample itself.
    #[serde(with = "duration_secs")]
    pub unlocked_to_locked_short: Duration,

    /// Time spent in `LockedShort` before escalating to `LockedLong`.
    #[serde(with = "duration_secs")]
    pub locked_short_to_locked_long: Duration,

    /// Time spent in `LockedLong` before falling back to `Idle`.
    #[serde(with = "duration_secs")]
    pub locked_long_to_idle: Duration,
}

impl Default for ProximityConfig {
    fn default() -> Self {
        Self {
            min_rssi: DEFAULT_MIN_RSSI,
            max_rssi: DEFAULT_MAX_RSSI,
            threshold_rssi: DEFAULT_THRESHOLD_RSSI,
            search_timeout: Duration::from_secs(20),
            unlocked_to_locked_short: Duration::from_secs(5),
            locked_short_to_locked_long: Duration::from_secs(15),
            locked_long_to_idle: Duration::from_secs(20),
        }
    }
}

impl ProximityConfig {
    /// Returns `true` if `rssi` counts as "near" for state transitions.
    #[inline]
    #[must_use]
    pub const fn is_above_threshold(&self, rssi: i16) -> bool {
        rssi >= self.threshold_rssi
    }

    /// Strict boundary used when colouring a signal display.
    ///
    /// Differs from [`Self::is_above_threshold`] at exactly `threshold_rssi`.
    #[inline]
    #[must_use]
    pub const fn is_strong_for_display(&self, rssi: i16) -> bool {
        rssi > self.threshold_rssi
    }

    /// Position of `rssi` between `min_rssi` and `max_rssi`, clamped to `[0, 1]`.
    #[must_use]
    pub fn signal_fraction(&self, rssi: i16) -> f64 {
        let span = f64::from(self.max_rssi) - f64::from(self.min_rssi);
        if span <= 0.0 {
            return 0.0;
        }
        ((f64::from(rssi) - f64::from(self.min_rssi)) / span).clamp(0.0, 1.0)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP API binds to.
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

/// Log filter and file output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info` or `proxlock_core=debug,info`.
    /// `RUST_LOG` overrides it.
    pub level: String,

    /// Directory for rolling log files in production. A platform default is
    /// used when unset.
    pub directory: Option<PathBuf>,

    /// File name prefix of the rolling log files.
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "proxlock".to_string(),
        }
    }
}

/// Returns `true` if `address` looks like `AA:BB:CC:DD:EE:FF`.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS_RE.is_match(address)
}

impl Config {
    /// Load configuration from `path`, layered under environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if the file is missing, a parse error
    /// if it cannot be deserialized, or validation errors.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::build(Some(path))
    }

    /// Load configuration from `path`, or defaults if it does not exist.
    ///
    /// Environment overrides apply in both cases.
    ///
    /// # Errors
    ///
    /// Returns a parse error if the sources cannot be deserialized, or
    /// validation errors.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::build(Some(path))
        } else {
            tracing::info!(path = %path.display(), "No configuration file, using defaults");
            Self::build(None)
        }
    }

    fn build(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every field, collecting all problems.
    ///
    /// # Errors
    ///
    /// Returns a single `ValidationError` or `MultipleValidationErrors`.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut reject = |field: &str, message: &str| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        let p = &self.proximity;
        if p.min_rssi >= p.threshold_rssi {
            reject("proximity.min_rssi", "must be below threshold_rssi");
        }
        if p.threshold_rssi >= p.max_rssi {
            reject("proximity.max_rssi", "must be above threshold_rssi");
        }

        let l = &self.link;
        // (field, value, zero allowed)
        let durations = [
            ("proximity.search_timeout", p.search_timeout, false),
            (
                "proximity.unlocked_to_locked_short",
                p.unlocked_to_locked_short,
                true,
            ),
            (
                "proximity.locked_short_to_locked_long",
                p.locked_short_to_locked_long,
                false,
            ),
            ("proximity.locked_long_to_idle", p.locked_long_to_idle, false),
            ("link.scan_timeout", l.scan_timeout, false),
            ("link.sample_interval", l.sample_interval, false),
        ];
        for (field, value, zero_allowed) in durations {
            if value.is_zero() && !zero_allowed {
                reject(field, "must be greater than zero");
            } else if value > MAX_DURATION {
                reject(field, "must not exceed 24 hours");
            }
        }

        if l.service_uuid == l.characteristic_uuid {
            reject(
                "link.characteristic_uuid",
                "must differ from service_uuid",
            );
        }
        if let Some(address) = &l.target_address {
            if !is_valid_mac_address(address) {
                reject("link.target_address", "expected format AA:BB:CC:DD:EE:FF");
            }
        }

        let log = &self.logging;
        if log.level.trim().is_empty() {
            reject("logging.level", "must not be empty");
        }
        if log.file_prefix.is_empty() || log.file_prefix.contains(std::path::is_separator) {
            reject("logging.file_prefix", "must be a plain file name");
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Default configuration file path.
    ///
    /// `PROXLOCK_CONFIG` wins if set.
    ///
    /// # Errors
    ///
    /// Returns an error if no configuration directory can be determined.
    pub fn default_path() -> ConfigResult<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        // On the kiosk host: /etc/proxlock/config.toml
        // For development: ~/.config/proxlock/config.toml
        #[cfg(target_os = "linux")]
        {
            Ok(PathBuf::from("/etc/proxlock/config.toml"))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let dirs = directories::ProjectDirs::from("", "", "proxlock").ok_or_else(|| {
                ConfigError::ValidationError {
                    field: "path".into(),
                    message: "Cannot determine config directory".into(),
                }
            })?;
            Ok(dirs.config_dir().join("config.toml"))
        }
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
