//! Error types for the peer transport layer

/// Result type alias using the peer Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or signaling
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Negotiation did not reach `connected` in time
    #[error("Connection timeout after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    /// Retry budget exhausted; the session stays failed
    #[error("Maximum retries ({0}) exceeded")]
    MaxRetriesExceeded(u32),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// SDP creation or parsing error
    #[error("SDP error: {0}")]
    SdpError(String),

    /// ICE candidate parsing or application error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Signaling server rejected a request or the channel failed
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// The server answered a request with a JSON-RPC error
    #[error("Server error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// Request got no response in time
    #[error("Request '{0}' timed out")]
    RequestTimeout(String),

    /// WebSocket handshake or framing error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The session or connection has already been shut down
    #[error("Session closed")]
    SessionClosed,

    /// Matchmaking core error (protocol encoding)
    #[error(transparent)]
    Core(#[from] tandem_core::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if the negotiation retry policy applies to this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::WebRtcError(_)
                | Error::SdpError(_)
                | Error::SignalingError(_)
                | Error::RequestTimeout(_)
                | Error::WebSocket(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}
