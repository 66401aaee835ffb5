//! Signaling server configuration

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tandem_core::MatchmakingConfig;

/// Default maximum size of one inbound frame (1 MB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1_000_000;

/// Configuration for the WebSocket server and the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingServerConfig {
    /// WebSocket bind address (default: "0.0.0.0:3001")
    pub bind_address: String,

    /// HTTP health bind address; `None` disables the endpoint
    pub health_address: Option<String>,

    /// Largest accepted text frame in bytes (default: 1000000)
    pub max_message_bytes: usize,

    /// Seconds to wait for a clean shutdown before forcing exit (default: 10)
    pub shutdown_grace_secs: u64,

    /// Registry, matcher and monitor settings
    pub matchmaking: MatchmakingConfig,
}

impl Default for SignalingServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3001".to_string(),
            health_address: Some("0.0.0.0:3002".to_string()),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            shutdown_grace_secs: 10,
            matchmaking: MatchmakingConfig::default(),
        }
    }
}

impl SignalingServerConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - an address does not parse as `host:port`
    /// - `max_message_bytes` is zero
    /// - the matchmaking section is invalid
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        self.bind_addr()?;
        self.health_addr()?;

        if self.max_message_bytes == 0 {
            return Err(Error::InvalidConfig(
                "max_message_bytes must be greater than 0".to_string(),
            ));
        }

        self.matchmaking.validate()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> crate::Result<SocketAddr> {
        parse_addr(&self.bind_address)
    }

    pub fn health_addr(&self) -> crate::Result<Option<SocketAddr>> {
        self.health_address.as_deref().map(parse_addr).transpose()
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Load a TOML configuration file; missing keys keep their defaults
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            crate::Error::InvalidConfig(format!("Failed to parse server config: {}", e))
        })
    }

    /// Config bound to ephemeral localhost ports, used by tests and demos
    pub fn local() -> Self {
        Self {
            bind_address: "127.0.0.1:0".to_string(),
            health_address: Some("127.0.0.1:0".to_string()),
            ..Default::default()
        }
    }

    pub fn with_matchmaking(mut self, matchmaking: MatchmakingConfig) -> Self {
        self.matchmaking = matchmaking;
        self
    }

    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }
}

fn parse_addr(addr: &str) -> crate::Result<SocketAddr> {
    addr.parse()
        .map_err(|e| crate::Error::InvalidConfig(format!("Invalid address '{}': {}", addr, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = SignalingServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_message_bytes, 1_000_000);
        assert_eq!(config.shutdown_grace(), Duration::from_secs(10));
    }

    #[test]
    fn test_invalid_address() {
        let config = SignalingServerConfig {
            bind_address: "not-an-address".to_string(),
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().is_config_error());
    }

    #[test]
    fn test_health_can_be_disabled() {
        let config = SignalingServerConfig {
            health_address: None,
            ..Default::default()
        };
        assert_eq!(config.health_addr().unwrap(), None);
    }

    #[test]
    fn test_load_nested_matchmaking_section() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_address = \"127.0.0.1:4000\"").unwrap();
        writeln!(file, "[matchmaking]").unwrap();
        writeln!(file, "heartbeat_timeout_ms = 60000").unwrap();
        writeln!(file, "enforce_lobby = false").unwrap();

        let config = SignalingServerConfig::load(file.path()).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:4000");
        assert_eq!(config.matchmaking.heartbeat_timeout_ms, 60_000);
        assert!(!config.matchmaking.enforce_lobby);
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert!(config.validate().is_ok());
    }
}
