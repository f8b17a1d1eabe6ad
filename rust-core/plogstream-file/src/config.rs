// SPDX-License-Identifier: Apache-2.0
//
// plogstream file manager - Configuration
//
// Tunables for the scan loop's liveness arithmetic, immutable after
// construction. The session layer hands configuration down as a flat
// key-value source, so alongside the serde derives there is a `from_kv`
// constructor that parses the session keys directly.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FileManagerError, FileResult};

/// Session key for the PLOG output location.
pub const KEY_LOCATION: &str = "plog_location_uri";
/// Session key for the poll interval count.
pub const KEY_SCAN_INTERVAL: &str = "scan_interval_count";
/// Session key for the poll sleep time in milliseconds.
pub const KEY_SCAN_WAIT_TIME: &str = "scan_wait_time_ms";
/// Session key for the health check interval (in polls).
pub const KEY_HEALTH_CHECK_INTERVAL: &str = "health_check_interval_count";
/// Session key for the quit interval (in health checks).
pub const KEY_SCAN_QUIT_INTERVAL: &str = "scan_quit_interval_count";

/// Configuration for a [`FileManager`](crate::manager::FileManager).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Root directory the mining process writes PLOG files to.
    pub location: PathBuf,

    /// Number of poll sleeps between file size probes while waiting for a
    /// segment's control header to be written.
    pub scan_interval_count: u32,

    /// Length of one poll sleep, in milliseconds.
    pub scan_wait_time_ms: u64,

    /// Number of unsuccessful polls between liveness log messages.
    pub health_check_interval_count: u32,

    /// Number of health check intervals after which the producer is
    /// presumed offline.
    pub scan_quit_interval_count: u32,
}

impl ManagerConfig {
    /// Configuration with default tunables for the given PLOG location.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        ManagerConfig {
            location: location.into(),
            ..Default::default()
        }
    }

    /// Build configuration from a flat key-value source (the session
    /// configuration format).
    ///
    /// The location key is mandatory; tunables fall back to their defaults
    /// when absent. Unparseable values are a
    /// [`FileManagerError::Configuration`].
    pub fn from_kv(values: &HashMap<String, String>) -> FileResult<Self> {
        let location = values.get(KEY_LOCATION).ok_or_else(|| {
            FileManagerError::Configuration(format!("missing required key: {KEY_LOCATION}"))
        })?;

        let mut config = ManagerConfig::new(location.as_str());

        if let Some(raw) = values.get(KEY_SCAN_INTERVAL) {
            config.scan_interval_count = parse_tunable(KEY_SCAN_INTERVAL, raw)?;
        }
        if let Some(raw) = values.get(KEY_SCAN_WAIT_TIME) {
            config.scan_wait_time_ms = parse_tunable(KEY_SCAN_WAIT_TIME, raw)?;
        }
        if let Some(raw) = values.get(KEY_HEALTH_CHECK_INTERVAL) {
            config.health_check_interval_count = parse_tunable(KEY_HEALTH_CHECK_INTERVAL, raw)?;
        }
        if let Some(raw) = values.get(KEY_SCAN_QUIT_INTERVAL) {
            config.scan_quit_interval_count = parse_tunable(KEY_SCAN_QUIT_INTERVAL, raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check that the configuration is usable: a readable PLOG directory
    /// and non-zero intervals (the liveness arithmetic divides by them).
    pub fn validate(&self) -> FileResult<()> {
        if !self.location.is_dir() {
            return Err(FileManagerError::Configuration(format!(
                "PLOG location is not a readable directory: {}",
                self.location.display()
            )));
        }
        if self.health_check_interval_count == 0 || self.scan_quit_interval_count == 0 {
            return Err(FileManagerError::Configuration(
                "health check and quit intervals must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// One poll sleep as a duration.
    pub fn scan_wait_time(&self) -> Duration {
        Duration::from_millis(self.scan_wait_time_ms)
    }

    /// The total time after which the producer is considered offline:
    /// quit interval x health check interval x poll sleep.
    pub fn timeout_duration(&self) -> Duration {
        self.scan_wait_time()
            * self.scan_quit_interval_count
            * self.health_check_interval_count
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            location: PathBuf::new(),
            scan_interval_count: 5,
            scan_wait_time_ms: 1000,
            health_check_interval_count: 10,
            scan_quit_interval_count: 60,
        }
    }
}

fn parse_tunable<T: std::str::FromStr>(key: &str, raw: &str) -> FileResult<T> {
    raw.trim().parse().map_err(|_| {
        FileManagerError::Configuration(format!("unparseable value for {key}: {raw:?}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.scan_interval_count, 5);
        assert_eq!(config.scan_wait_time_ms, 1000);
        assert_eq!(config.health_check_interval_count, 10);
        assert_eq!(config.scan_quit_interval_count, 60);
    }

    #[test]
    fn test_timeout_duration_arithmetic() {
        let mut config = ManagerConfig::new("/tmp");
        config.scan_wait_time_ms = 500;
        config.health_check_interval_count = 10;
        config.scan_quit_interval_count = 12;
        assert_eq!(
            config.timeout_duration(),
            Duration::from_millis(500 * 10 * 12)
        );
    }

    #[test]
    fn test_from_kv_full() {
        let dir = TempDir::new().unwrap();
        let mut values = HashMap::new();
        values.insert(
            KEY_LOCATION.to_string(),
            dir.path().display().to_string(),
        );
        values.insert(KEY_SCAN_INTERVAL.to_string(), "3".to_string());
        values.insert(KEY_SCAN_WAIT_TIME.to_string(), "250".to_string());
        values.insert(KEY_HEALTH_CHECK_INTERVAL.to_string(), "5".to_string());
        values.insert(KEY_SCAN_QUIT_INTERVAL.to_string(), "8".to_string());

        let config = ManagerConfig::from_kv(&values).unwrap();
        assert_eq!(config.location, dir.path());
        assert_eq!(config.scan_interval_count, 3);
        assert_eq!(config.scan_wait_time_ms, 250);
        assert_eq!(config.health_check_interval_count, 5);
        assert_eq!(config.scan_quit_interval_count, 8);
    }

    #[test]
    fn test_from_kv_missing_location() {
        let result = ManagerConfig::from_kv(&HashMap::new());
        assert!(matches!(
            result,
            Err(FileManagerError::Configuration(_))
        ));
    }

    #[test]
    fn test_from_kv_unparseable_tunable() {
        let dir = TempDir::new().unwrap();
        let mut values = HashMap::new();
        values.insert(
            KEY_LOCATION.to_string(),
            dir.path().display().to_string(),
        );
        values.insert(KEY_SCAN_WAIT_TIME.to_string(), "soon".to_string());

        let result = ManagerConfig::from_kv(&values);
        assert!(matches!(
            result,
            Err(FileManagerError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_missing_directory() {
        let config = ManagerConfig::new("/nonexistent/plog/location");
        assert!(matches!(
            config.validate(),
            Err(FileManagerError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_intervals() {
        let dir = TempDir::new().unwrap();
        let mut config = ManagerConfig::new(dir.path());
        config.health_check_interval_count = 0;
        assert!(config.validate().is_err());
    }
}
