//! Configuration for the client side: signaling, ICE and negotiation policy

use crate::lifecycle::ReconnectionPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (e.g., "turn:turn.example.com:3478")
    pub url: String,
    pub username: String,
    pub credential: String,
}

/// Main configuration for a client session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Signaling server URL (e.g., "ws://localhost:3001")
    pub signaling_url: String,

    /// STUN server URLs (e.g., "stun:stun.l.google.com:19302")
    pub stun_servers: Vec<String>,

    /// TURN servers for relay fallback
    pub turn_servers: Vec<TurnServerConfig>,

    /// Time allowed in `negotiating` before a failure is declared (default: 30000)
    pub negotiation_timeout_ms: u64,

    /// Transport rebuilds allowed per match (default: 3)
    pub max_retries: u32,

    /// Early ICE candidates kept before the remote description (default: 64)
    pub candidate_buffer: usize,

    /// Heartbeat period on the signaling connection (default: 30000)
    pub heartbeat_interval_ms: u64,

    /// How long a signaling request waits for its response (default: 10000)
    pub request_timeout_ms: u64,

    /// Signaling connection retry policy
    pub reconnection: ReconnectionPolicy,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:3001".to_string(),
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: vec![],
            negotiation_timeout_ms: 30_000,
            max_retries: 3,
            candidate_buffer: 64,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 10_000,
            reconnection: ReconnectionPolicy::default(),
        }
    }
}

impl PeerConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a ws:// or wss:// URL
    /// - a STUN/TURN URL has the wrong scheme
    /// - any timeout or the candidate buffer is zero
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "Signaling URL must start with ws:// or wss://, got: {}",
                self.signaling_url
            )));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") && !url.starts_with("stuns:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN URL must start with stun: or stuns:, got: {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN URL must start with turn: or turns:, got: {}",
                    turn.url
                )));
            }
        }

        if self.negotiation_timeout_ms == 0
            || self.heartbeat_interval_ms == 0
            || self.request_timeout_ms == 0
        {
            return Err(Error::InvalidConfig(
                "timeouts and intervals must be greater than 0".to_string(),
            ));
        }

        if self.candidate_buffer == 0 {
            return Err(Error::InvalidConfig(
                "candidate_buffer must be greater than 0".to_string(),
            ));
        }

        self.reconnection.validate()
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Set the signaling server URL
    pub fn with_signaling_url(mut self, url: impl Into<String>) -> Self {
        self.signaling_url = url.into();
        self
    }

    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_candidate_buffer(mut self, capacity: usize) -> Self {
        self.candidate_buffer = capacity;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnection(mut self, policy: ReconnectionPolicy) -> Self {
        self.reconnection = policy;
        self
    }
}
