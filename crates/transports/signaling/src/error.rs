//! Error types for the signaling server

/// Result type alias using the signaling Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while serving signaling connections
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to bind or serve a listener
    #[error("Server error: {0}")]
    ServerError(String),

    /// WebSocket handshake or framing error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Matchmaking core error
    #[error(transparent)]
    Core(#[from] tandem_core::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        match self {
            Error::InvalidConfig(_) => true,
            Error::Core(e) => e.is_config_error(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_config_errors_are_config_errors() {
        let err = Error::from(tandem_core::Error::InvalidConfig("x".to_string()));
        assert!(err.is_config_error());
        assert!(!Error::ServerError("bind".to_string()).is_config_error());
    }
}
