//! Engine configuration.
//!
//! All knobs have defaults matching a medium-size deployment; intervals
//! carry floors so a misconfigured timer can never hammer the backend.

use std::path::Path;
use std::time::Duration;

use plume_store::ReadOrder;
use serde::Deserialize;

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The config file could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Engine configuration, parsed from TOML or built in code.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds between periodic whole-cache flushes. Default 120, floor 20.
    pub flush_interval_secs: Option<u64>,
    /// Seconds between purge passes. Default 300, floor 60; the effective
    /// period is doubled when clustering is active.
    pub purge_interval_secs: Option<u64>,
    /// Pending-item count above which a publish triggers an asynchronous
    /// flush. Default 1000; 0 disables both the threshold and the flush
    /// timer.
    pub max_pending_items: Option<usize>,
    /// Cap on rows fetched by any published-item query. Default 2000.
    pub max_rows_fetch: Option<usize>,
    /// Individual write attempts per item before it is dropped. Default 1.
    pub max_item_retry: Option<u32>,
    /// Present published-item queries newest-first. Default false (oldest
    /// first).
    pub descending_order: bool,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Effective flush timer period (default 120 s, floor 20 s).
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.unwrap_or(120).max(20))
    }

    /// Effective purge timer period (default 300 s, floor 60 s), doubled
    /// when clustering is active since every member runs the purge job
    /// independently.
    pub fn purge_interval(&self, clustered: bool) -> Duration {
        let base = Duration::from_secs(self.purge_interval_secs.unwrap_or(300).max(60));
        if clustered { base * 2 } else { base }
    }

    /// Effective pending-item flush threshold (default 1000; 0 disables).
    pub fn max_pending_items(&self) -> usize {
        self.max_pending_items.unwrap_or(1000)
    }

    /// Effective fetch cap for published-item queries (default 2000).
    pub fn max_rows_fetch(&self) -> usize {
        self.max_rows_fetch.unwrap_or(2000)
    }

    /// Effective per-item retry bound (default 1).
    pub fn max_item_retry(&self) -> u32 {
        self.max_item_retry.unwrap_or(1)
    }

    /// Effective presentation order for published-item queries.
    pub fn read_order(&self) -> ReadOrder {
        if self.descending_order {
            ReadOrder::Descending
        } else {
            ReadOrder::Ascending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.flush_interval(), Duration::from_secs(120));
        assert_eq!(config.purge_interval(false), Duration::from_secs(300));
        assert_eq!(config.max_pending_items(), 1000);
        assert_eq!(config.max_rows_fetch(), 2000);
        assert_eq!(config.max_item_retry(), 1);
        assert_eq!(config.read_order(), ReadOrder::Ascending);
    }

    #[test]
    fn test_interval_floors() {
        let config = EngineConfig {
            flush_interval_secs: Some(5),
            purge_interval_secs: Some(10),
            ..Default::default()
        };
        assert_eq!(config.flush_interval(), Duration::from_secs(20));
        assert_eq!(config.purge_interval(false), Duration::from_secs(60));
    }

    #[test]
    fn test_purge_interval_doubles_under_clustering() {
        let config = EngineConfig {
            purge_interval_secs: Some(300),
            ..Default::default()
        };
        assert_eq!(config.purge_interval(true), Duration::from_secs(600));
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
flush_interval_secs = 60
purge_interval_secs = 600
max_pending_items = 500
max_rows_fetch = 100
max_item_retry = 3
descending_order = true
"#;
        let config = EngineConfig::from_toml(toml).unwrap();
        assert_eq!(config.flush_interval(), Duration::from_secs(60));
        assert_eq!(config.purge_interval(false), Duration::from_secs(600));
        assert_eq!(config.max_pending_items(), 500);
        assert_eq!(config.max_rows_fetch(), 100);
        assert_eq!(config.max_item_retry(), 3);
        assert_eq!(config.read_order(), ReadOrder::Descending);
    }

    #[test]
    fn test_parse_empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config.max_pending_items(), 1000);
        assert!(!config.descending_order);
    }

    #[test]
    fn test_zero_threshold_disables() {
        let config = EngineConfig {
            max_pending_items: Some(0),
            ..Default::default()
        };
        assert_eq!(config.max_pending_items(), 0);
    }
}
