//! Session configuration
//!
//! Port settings and command-mode timing. Stored as JSON so a tuned setup
//! for a particular cable or radio can be reused.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    ProtocolError, DEFAULT_ATTEMPTS, DEFAULT_BACKOFF_MS, DEFAULT_BAUD_RATE,
    DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_GUARD_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_PROBE_TIMEOUT_MS,
};

/// Upper bound on any single bounded wait, in milliseconds
pub const MAX_WAIT_MS: u64 = 3000;

/// Shortest probe deadline or entry backoff the modem's link needs to settle
const MIN_ENTRY_WAIT_MS: u64 = 1000;

const MAX_ENTRY_BACKOFF_MS: u64 = 2000;

/// How the session asks the modem to enter command mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStrategy {
    /// Guard-banded `+++` escape sequence
    #[default]
    Escape,
    /// Pulse DTR high then low
    ControlLine,
    /// Pulse DTR, then send the escape sequence
    ControlLineThenEscape,
}

impl EntryStrategy {
    /// Whether entry pulses DTR
    pub fn uses_control_line(&self) -> bool {
        matches!(
            self,
            EntryStrategy::ControlLine | EntryStrategy::ControlLineThenEscape
        )
    }

    /// Whether entry sends the `+++` escape
    pub fn uses_escape(&self) -> bool {
        matches!(
            self,
            EntryStrategy::Escape | EntryStrategy::ControlLineThenEscape
        )
    }
}

impl std::str::FromStr for EntryStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "escape" => Ok(EntryStrategy::Escape),
            "control_line" | "dtr" => Ok(EntryStrategy::ControlLine),
            "control_line_then_escape" | "dtr_then_escape" => {
                Ok(EntryStrategy::ControlLineThenEscape)
            }
            other => Err(ProtocolError::Config(format!(
                "unknown entry strategy '{}'",
                other
            ))),
        }
    }
}

/// Port and timing configuration for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Per-command response timeout in milliseconds, at most three seconds
    pub command_timeout_ms: u64,
    /// Quiet period on each side of the escape sequence in milliseconds
    pub guard_ms: u64,
    /// How long to wait for the `AT` probe answer in milliseconds, one to three seconds
    pub probe_timeout_ms: u64,
    /// Full entry sequences to try before giving up
    pub entry_attempts: u32,
    /// Pause between entry attempts in milliseconds, one to two seconds
    pub entry_backoff_ms: u64,
    /// Interval between input polls in milliseconds
    pub poll_interval_ms: u64,
    /// How command mode is entered
    pub entry_strategy: EntryStrategy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            command_timeout_ms: DEFAULT_COMMAND_TIMEOUT_MS,
            guard_ms: DEFAULT_GUARD_MS,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            entry_attempts: DEFAULT_ATTEMPTS,
            entry_backoff_ms: DEFAULT_BACKOFF_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            entry_strategy: EntryStrategy::default(),
        }
    }
}

impl SessionConfig {
    /// Default configuration for the given port
    pub fn for_port(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Per-command timeout, capped at [`MAX_WAIT_MS`]
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms.min(MAX_WAIT_MS))
    }

    /// Guard period, never shorter than the one second the modem's escape detector needs
    pub fn guard_period(&self) -> Duration {
        Duration::from_millis(self.guard_ms.max(DEFAULT_GUARD_MS))
    }

    /// Probe deadline, held between one second and [`MAX_WAIT_MS`]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms.clamp(MIN_ENTRY_WAIT_MS, MAX_WAIT_MS))
    }

    /// Pause between entry attempts, held between one and two seconds
    pub fn entry_backoff(&self) -> Duration {
        Duration::from_millis(
            self.entry_backoff_ms
                .clamp(MIN_ENTRY_WAIT_MS, MAX_ENTRY_BACKOFF_MS),
        )
    }

    /// Input poll interval, at least one millisecond
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Reject settings that would make the session unusable
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::Config("baud_rate must be non-zero".into()));
        }
        if self.entry_attempts == 0 {
            return Err(ProtocolError::Config(
                "entry_attempts must be at least 1".into(),
            ));
        }
        if self.command_timeout_ms == 0 || self.probe_timeout_ms == 0 {
            return Err(ProtocolError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content).map_err(|e| {
            ProtocolError::Config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ProtocolError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ProtocolError::Config(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.command_timeout(), Duration::from_secs(1));
        assert_eq!(config.entry_attempts, 3);
        assert_eq!(config.entry_strategy, EntryStrategy::Escape);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_guard_period_has_floor() {
        let mut config = SessionConfig::default();
        config.guard_ms = 10;
        assert_eq!(config.guard_period(), Duration::from_secs(1));
        config.guard_ms = 1500;
        assert_eq!(config.guard_period(), Duration::from_millis(1500));
    }

    #[test]
    fn test_waits_are_bounded() {
        let mut config = SessionConfig::default();
        config.command_timeout_ms = 60_000;
        config.probe_timeout_ms = 200;
        config.entry_backoff_ms = 0;
        assert_eq!(config.command_timeout(), Duration::from_secs(3));
        assert_eq!(config.probe_timeout(), Duration::from_secs(1));
        assert_eq!(config.entry_backoff(), Duration::from_secs(1));

        config.command_timeout_ms = 250;
        config.probe_timeout_ms = 10_000;
        config.entry_backoff_ms = 5000;
        assert_eq!(config.command_timeout(), Duration::from_millis(250));
        assert_eq!(config.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.entry_backoff(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"port_name": "/dev/ttyUSB0", "entry_strategy": "control_line"}"#)
                .unwrap();
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.entry_strategy, EntryStrategy::ControlLine);
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rfd.json");

        let mut config = SessionConfig::for_port("/dev/ttyUSB3");
        config.baud_rate = 115200;
        config.entry_strategy = EntryStrategy::ControlLineThenEscape;
        config.save(&path).unwrap();

        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_load_rejects_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"entry_attempts": 0}"#).unwrap();
        assert!(matches!(
            SessionConfig::load(&path),
            Err(ProtocolError::Config(_))
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SessionConfig::load(&path),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("dtr".parse::<EntryStrategy>().unwrap(), EntryStrategy::ControlLine);
        assert_eq!(
            "control-line-then-escape".parse::<EntryStrategy>().unwrap(),
            EntryStrategy::ControlLineThenEscape
        );
        assert!("magic".parse::<EntryStrategy>().is_err());
    }
}
