//! Logging setup for processes embedding the feed engine.
//!
//! The engine itself only emits `tracing` events; this module installs a
//! subscriber driven by the `host.logger` configuration block.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    /// Minimum level (`TRACE`, `DEBUG`, `INFO`, `WARN`, `ERROR`).
    pub min_level: String,
    pub enable_console: bool,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            min_level: "INFO".to_string(),
            enable_console: true,
        }
    }
}

impl LoggingOptions {
    /// Reads `host.logger.*` from the global configuration.
    pub fn from_config() -> Self {
        let config = clipconfig::get_config();
        let defaults = Self::default();
        Self {
            min_level: config.get_log_min_level().unwrap_or(defaults.min_level),
            enable_console: config
                .get_log_enable_console()
                .unwrap_or(defaults.enable_console),
        }
    }
}

/// Converts a configured level name, `None` when unknown.
pub fn string_to_level(level: &str) -> Option<LevelFilter> {
    match level.trim().to_ascii_uppercase().as_str() {
        "TRACE" => Some(LevelFilter::TRACE),
        "DEBUG" => Some(LevelFilter::DEBUG),
        "INFO" => Some(LevelFilter::INFO),
        "WARN" | "WARNING" => Some(LevelFilter::WARN),
        "ERROR" => Some(LevelFilter::ERROR),
        "OFF" => Some(LevelFilter::OFF),
        _ => None,
    }
}

fn build_filter(options: &LoggingOptions) -> EnvFilter {
    // RUST_LOG garde la priorité sur la configuration
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = string_to_level(&options.min_level).unwrap_or(LevelFilter::INFO);
    EnvFilter::default().add_directive(level.into())
}

/// Installs the global subscriber from the global configuration.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with(&LoggingOptions::from_config())
}

pub fn init_logging_with(options: &LoggingOptions) -> bool {
    let subscriber = Registry::default().with(build_filter(options));

    let installed = if options.enable_console {
        subscriber
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_ansi(true),
            )
            .try_init()
            .is_ok()
    } else {
        subscriber.try_init().is_ok()
    };

    if installed {
        tracing::debug!(level = %options.min_level, console = options.enable_console, "Logging initialized");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_names() {
        assert_eq!(string_to_level("info"), Some(LevelFilter::INFO));
        assert_eq!(string_to_level(" Warning "), Some(LevelFilter::WARN));
        assert_eq!(string_to_level("verbose"), None);
    }

    #[test]
    fn test_second_init_is_refused() {
        let options = LoggingOptions {
            min_level: "DEBUG".into(),
            enable_console: false,
        };
        init_logging_with(&options);
        assert!(!init_logging_with(&options));
    }
}
