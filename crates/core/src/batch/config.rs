//! Batching and recovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for window collation and provider polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// How long distinct requests accumulate before being submitted together (milliseconds).
    #[serde(default = "default_collation_window")]
    pub collation_window_ms: u64,

    /// First delay between status polls of a submitted batch (milliseconds).
    #[serde(default = "default_poll_initial_interval")]
    pub poll_initial_interval_ms: u64,

    /// Upper bound for the doubling poll delay (milliseconds).
    #[serde(default = "default_poll_max_interval")]
    pub poll_max_interval_ms: u64,
}

fn default_collation_window() -> u64 {
    5000 // 5 seconds
}

fn default_poll_initial_interval() -> u64 {
    5000 // 5 seconds
}

fn default_poll_max_interval() -> u64 {
    300_000 // 5 minutes
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            collation_window_ms: default_collation_window(),
            poll_initial_interval_ms: default_poll_initial_interval(),
            poll_max_interval_ms: default_poll_max_interval(),
        }
    }
}

impl BatchingConfig {
    pub fn collation_window(&self) -> Duration {
        Duration::from_millis(self.collation_window_ms)
    }

    pub fn poll_initial_interval(&self) -> Duration {
        Duration::from_millis(self.poll_initial_interval_ms)
    }

    pub fn poll_max_interval(&self) -> Duration {
        Duration::from_millis(self.poll_max_interval_ms)
    }
}

/// Configuration for dangling-batch recovery at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Run recovery when the orchestrator starts.
    #[serde(default = "default_true")]
    pub on_startup: bool,

    /// Also run recovery when serving in cache-only mode.
    /// Keeps the cache and status log accurate even though no new work is submitted.
    #[serde(default = "default_true")]
    pub in_cache_only_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            in_cache_only_mode: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BatchingConfig::default();
        assert_eq!(config.collation_window(), Duration::from_secs(5));
        assert_eq!(config.poll_initial_interval(), Duration::from_secs(5));
        assert_eq!(config.poll_max_interval(), Duration::from_secs(300));

        let recovery = RecoveryConfig::default();
        assert!(recovery.on_startup);
        assert!(recovery.in_cache_only_mode);
    }

    #[test]
    fn test_deserialize_minimal() {
        let toml = r#"
            collation_window_ms = 250
        "#;
        let config: BatchingConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.collation_window_ms, 250);
        assert_eq!(config.poll_initial_interval_ms, 5000);
        assert_eq!(config.poll_max_interval_ms, 300_000);
    }

    #[test]
    fn test_deserialize_recovery() {
        let toml = r#"
            in_cache_only_mode = false
        "#;
        let config: RecoveryConfig = toml::from_str(toml).unwrap();
        assert!(config.on_startup);
        assert!(!config.in_cache_only_mode);
    }
}
