use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::{Result, SerialError};

/// Timing and recovery policy for a [`ConnectionManager`](super::ConnectionManager).
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkOptions {
    /// Reader sleep when no bytes are waiting.
    pub poll_interval_ms: u64,
    /// Upper bound for one read of the available bytes.
    pub read_timeout_ms: u64,
    /// Upper bound for one write + flush.
    pub write_timeout_ms: u64,
    /// Reader pause after an I/O failure, before it exits.
    pub failure_cooldown_ms: u64,
    /// Watcher cadence.
    pub watch_interval_ms: u64,
    /// Watcher pause between closing a failed link and reopening it.
    pub reopen_delay_ms: u64,
    /// How long to wait for a loop to stop before aborting it.
    pub join_timeout_ms: u64,
    /// Events buffered per subscriber before a slow one starts lagging.
    pub event_capacity: usize,
    /// Treat a failed write like a failed read and trigger a reconnect.
    pub write_failure_raises_error: bool,
    /// Treat a hardware fault notification as a broken link.
    pub fault_raises_error: bool,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            failure_cooldown_ms: 1000,
            watch_interval_ms: 1000,
            reopen_delay_ms: 1000,
            join_timeout_ms: 5000,
            event_capacity: 256,
            write_failure_raises_error: false,
            fault_raises_error: false,
        }
    }
}

impl LinkOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SerialError::InvalidConfiguration(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_millis(self.failure_cooldown_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }

    pub fn reopen_delay(&self) -> Duration {
        Duration::from_millis(self.reopen_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let options = LinkOptions::from_json(r#"{"watch_interval_ms": 250, "fault_raises_error": true}"#).unwrap();
        assert_eq!(options.watch_interval(), Duration::from_millis(250));
        assert!(options.fault_raises_error);
        assert_eq!(options.poll_interval(), Duration::from_millis(100));
        assert_eq!(options.join_timeout(), Duration::from_secs(5));
        assert!(!options.write_failure_raises_error);
    }

    #[test]
    fn test_bad_json_is_invalid_configuration() {
        let err = LinkOptions::from_json("{ not json").unwrap_err();
        assert!(matches!(err, SerialError::InvalidConfiguration(_)));
    }
}
