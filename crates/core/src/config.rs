//! Configuration types for the matchmaking core

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default inactivity window before an endpoint is evicted (5 minutes)
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 300_000;

/// Which side of a new match builds the first offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiatorRole {
    /// The endpoint whose find-partner completed the match (default)
    #[default]
    Caller,
    /// The endpoint that was waiting in the pool
    Waiter,
}

/// Main configuration for the registry, matcher and lifecycle monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Inactivity window before eviction in milliseconds (default: 300000)
    pub heartbeat_timeout_ms: u64,

    /// Period of the deadline sweep in milliseconds (default: 1000)
    pub sweep_interval_ms: u64,

    /// Only pair endpoints in the same lobby (default: true)
    pub enforce_lobby: bool,

    /// Initiator assignment for new matches (default: caller)
    pub initiator_role: InitiatorRole,

    /// Capacity of each endpoint's outbound event channel (default: 128)
    pub outbound_buffer: usize,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            sweep_interval_ms: 1000,
            enforce_lobby: true,
            initiator_role: InitiatorRole::Caller,
            outbound_buffer: 128,
        }
    }
}

impl MatchmakingConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `heartbeat_timeout_ms` is zero
    /// - `sweep_interval_ms` is zero or longer than the heartbeat timeout
    /// - `outbound_buffer` is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.heartbeat_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "heartbeat_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.sweep_interval_ms == 0 || self.sweep_interval_ms > self.heartbeat_timeout_ms {
            return Err(Error::InvalidConfig(format!(
                "sweep_interval_ms must be in range 1-{}, got {}",
                self.heartbeat_timeout_ms, self.sweep_interval_ms
            )));
        }

        if self.outbound_buffer == 0 {
            return Err(Error::InvalidConfig(
                "outbound_buffer must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Parse a configuration from TOML text; missing keys keep their defaults
    pub fn from_toml_str(text: &str) -> crate::Result<Self> {
        toml::from_str(text).map_err(|e| {
            crate::Error::InvalidConfig(format!("Failed to parse matchmaking config: {}", e))
        })
    }

    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the inactivity window
    ///
    /// Useful for chaining with `Default::default()`.
    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the sweep period
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Enable or disable lobby equality when matching
    pub fn with_lobby_enforcement(mut self, enforce: bool) -> Self {
        self.enforce_lobby = enforce;
        self
    }

    pub fn with_initiator_role(mut self, role: InitiatorRole) -> Self {
        self.initiator_role = role;
        self
    }
}
