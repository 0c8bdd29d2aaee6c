//! Subscriber setup driven by the `[logging]` configuration section.
//!
//! Production writes JSON to daily rolling files under
//! `logging.directory`, plus compact lines to stdout for the journal.
//! Development writes pretty output to stdout with span open/close events.

use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::Context;
use proxlock_core::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable selecting production logging (`production`).
pub const ENVIRONMENT_ENV: &str = "PROXLOCK_ENV";

// Non-blocking writers flush on drop; keep them for the life of the process.
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();
static STDOUT_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Returns `true` when `PROXLOCK_ENV` asks for production logging.
#[must_use]
pub fn is_production() -> bool {
    std::env::var(ENVIRONMENT_ENV).is_ok_and(|env| env.eq_ignore_ascii_case("production"))
}

/// Initialize the global subscriber from `config`.
///
/// # Errors
///
/// Returns an error if the filter directive cannot be parsed or the log
/// directory cannot be created.
pub fn init(config: &LoggingConfig, is_production: bool) -> anyhow::Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(&config.level, rust_log.as_deref())?;

    if is_production {
        init_production(config, filter)
    } else {
        init_development(filter);
        Ok(())
    }
}

/// `RUST_LOG` wins over the configured level when it is set and parses.
fn build_filter(level: &str, rust_log: Option<&str>) -> anyhow::Result<EnvFilter> {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        if let Ok(filter) = EnvFilter::try_new(directive) {
            return Ok(filter);
        }
    }
    EnvFilter::try_new(level).with_context(|| format!("Invalid logging.level '{level}'"))
}

fn init_production(config: &LoggingConfig, filter: EnvFilter) -> anyhow::Result<()> {
    let log_dir = log_directory(config);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, &config.file_prefix);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_current_span(true)
        .with_file(true)
        .with_line_number(true);

    // journald stamps its own time.
    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_writer(stdout_writer)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    let _ = FILE_GUARD.set(file_guard);
    let _ = STDOUT_GUARD.set(stdout_guard);
    tracing::info!(directory = %log_dir.display(), "Writing logs");
    Ok(())
}

fn init_development(filter: EnvFilter) {
    let stdout_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .init();
}

/// Configured log directory, else the platform default.
fn log_directory(config: &LoggingConfig) -> PathBuf {
    if let Some(dir) = &config.directory {
        return dir.clone();
    }
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/log/proxlock")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "proxlock")
            .map_or_else(|| PathBuf::from("./logs"), |dirs| dirs.data_dir().join("logs"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_directory_is_used() {
        let config = LoggingConfig {
            directory: Some(PathBuf::from("/srv/proxlock/logs")),
            ..LoggingConfig::default()
        };
        assert_eq!(log_directory(&config), PathBuf::from("/srv/proxlock/logs"));
    }

    #[test]
    fn test_default_directory_is_named_for_proxlock() {
        let dir = log_directory(&LoggingConfig::default());
        assert!(dir.to_string_lossy().contains("proxlock") || dir.ends_with("logs"));
    }

    #[test]
    fn test_filter_uses_configured_level() {
        let filter = build_filter("proxlock_core=debug,warn", None).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("proxlock_core=debug"));
        assert!(rendered.contains("warn"));
    }

    #[test]
    fn test_rust_log_overrides_configured_level() {
        let filter = build_filter("info", Some("trace")).unwrap();
        assert_eq!(filter.to_string(), "trace");
    }

    #[test]
    fn test_unparseable_rust_log_falls_back_to_config() {
        let filter = build_filter("info", Some("proxlock=notalevel")).unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_configured_level_is_an_error() {
        assert!(build_filter("proxlock=notalevel", None).is_err());
    }
}
