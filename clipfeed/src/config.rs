//! Typed view of the `feed` configuration block.
//!
//! Every field has a serde default so a partial (or missing) YAML block still
//! yields a usable configuration, whatever loaded it (embedded defaults,
//! clipconfig overrides, tests).

use serde::{Deserialize, Serialize};
use std::time::Duration;

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.0))
}

/// Top-level `feed` block.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub fill: FillConfig,
    #[serde(default)]
    pub preload: PreloadConfig,
    #[serde(default)]
    pub arbiter: ArbiterConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
}

/// Cache window sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "CacheConfig::default_capacity")]
    pub capacity: usize,
    #[serde(default = "CacheConfig::default_max_fill_attempts")]
    pub max_fill_attempts: usize,
}

impl CacheConfig {
    const fn default_capacity() -> usize {
        clipcache::store::DEFAULT_CAPACITY
    }

    const fn default_max_fill_attempts() -> usize {
        clipcache::store::DEFAULT_MAX_ATTEMPTS
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: Self::default_capacity(),
            max_fill_attempts: Self::default_max_fill_attempts(),
        }
    }
}

/// Background fill tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillConfig {
    #[serde(default = "FillConfig::default_startup_attempts")]
    pub startup_attempts: usize,
    #[serde(default = "FillConfig::default_failure_threshold")]
    pub failure_threshold: usize,
    #[serde(default = "FillConfig::default_failure_pause")]
    pub failure_pause_secs: f64,
}

impl FillConfig {
    const fn default_startup_attempts() -> usize {
        3
    }

    const fn default_failure_threshold() -> usize {
        5
    }

    fn default_failure_pause() -> f64 {
        2.0
    }

    pub fn failure_pause(&self) -> Duration {
        secs(self.failure_pause_secs)
    }
}

impl Default for FillConfig {
    fn default() -> Self {
        Self {
            startup_attempts: Self::default_startup_attempts(),
            failure_threshold: Self::default_failure_threshold(),
            failure_pause_secs: Self::default_failure_pause(),
        }
    }
}

/// Preload pipeline timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadConfig {
    #[serde(default = "PreloadConfig::default_poll_interval")]
    pub poll_interval_secs: f64,
    #[serde(default = "PreloadConfig::default_ready_confirmations")]
    pub ready_confirmations: usize,
    #[serde(default = "PreloadConfig::default_retry_delay")]
    pub retry_delay_secs: f64,
    #[serde(default = "PreloadConfig::default_timeout")]
    pub timeout_secs: f64,
}

impl PreloadConfig {
    fn default_poll_interval() -> f64 {
        0.5
    }

    const fn default_ready_confirmations() -> usize {
        2
    }

    fn default_retry_delay() -> f64 {
        0.5
    }

    fn default_timeout() -> f64 {
        10.0
    }

    pub fn poll_interval(&self) -> Duration {
        secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        secs(self.retry_delay_secs)
    }

    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: Self::default_poll_interval(),
            ready_confirmations: Self::default_ready_confirmations(),
            retry_delay_secs: Self::default_retry_delay(),
            timeout_secs: Self::default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    #[serde(default = "ArbiterConfig::default_watchdog")]
    pub watchdog_secs: f64,
}

impl ArbiterConfig {
    fn default_watchdog() -> f64 {
        3.0
    }

    pub fn watchdog(&self) -> Duration {
        secs(self.watchdog_secs)
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: Self::default_watchdog(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "HistoryConfig::default_max_sessions")]
    pub max_sessions: usize,
}

impl HistoryConfig {
    const fn default_max_sessions() -> usize {
        clipcache::history::DEFAULT_MAX_SESSIONS
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_sessions: Self::default_max_sessions(),
        }
    }
}

/// Selection pool persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    /// SQLite file, relative to the config directory unless absolute.
    #[serde(default = "SelectionConfig::default_database")]
    pub database: String,
}

impl SelectionConfig {
    fn default_database() -> String {
        "selection_pool.db".to_string()
    }
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            database: Self::default_database(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = FeedConfig::default();
        assert_eq!(cfg.cache.capacity, 3);
        assert_eq!(cfg.cache.max_fill_attempts, 20);
        assert_eq!(cfg.fill.startup_attempts, 3);
        assert_eq!(cfg.fill.failure_threshold, 5);
        assert_eq!(cfg.fill.failure_pause(), Duration::from_secs(2));
        assert_eq!(cfg.preload.poll_interval(), Duration::from_millis(500));
        assert_eq!(cfg.preload.ready_confirmations, 2);
        assert_eq!(cfg.preload.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.arbiter.watchdog(), Duration::from_secs(3));
        assert_eq!(cfg.history.max_sessions, 20);
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = "cache:\n  capacity: 5\npreload:\n  timeout_secs: 4.5\n";
        let cfg: FeedConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.cache.capacity, 5);
        assert_eq!(cfg.cache.max_fill_attempts, 20);
        assert_eq!(cfg.preload.timeout(), Duration::from_millis(4500));
        assert_eq!(cfg.preload.ready_confirmations, 2);
    }
}
