//! Error types for the matchmaking core

use crate::endpoint::EndpointId;
use crate::protocol::error_codes;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in registry, matcher and relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Endpoint is not (or no longer) registered
    #[error("Endpoint not found: {0}")]
    EndpointNotFound(EndpointId),

    /// Endpoint id collision on register
    #[error("Endpoint already registered: {0}")]
    AlreadyRegistered(EndpointId),

    /// find-partner called while already partnered
    #[error("Endpoint {0} is already matched")]
    AlreadyMatched(EndpointId),

    /// Signaling message sent without an active partner
    #[error("Endpoint {0} has no partner")]
    NoPartner(EndpointId),

    /// Recipient channel was full or closed at relay time
    #[error("Recipient unreachable: {0}")]
    RecipientUnreachable(EndpointId),

    /// Asymmetric partner link detected (both sides were unpaired)
    #[error("Registry inconsistency: {0}")]
    RegistryInconsistency(String),

    /// Malformed or unsupported protocol message
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if the caller can simply carry on (remain waiting / return to idle)
    ///
    /// Registry and matcher level errors never terminate a connection.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::AlreadyMatched(_)
                | Error::NoPartner(_)
                | Error::RecipientUnreachable(_)
                | Error::RegistryInconsistency(_)
                | Error::ProtocolError(_)
        )
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// JSON-RPC error code reported to the client for this error
    pub fn rpc_code(&self) -> i32 {
        match self {
            Error::EndpointNotFound(_) => error_codes::ENDPOINT_NOT_FOUND,
            Error::AlreadyRegistered(_) => error_codes::INVALID_REQUEST,
            Error::AlreadyMatched(_) => error_codes::ALREADY_MATCHED,
            Error::NoPartner(_) => error_codes::NO_PARTNER,
            Error::RecipientUnreachable(_) => error_codes::RECIPIENT_UNREACHABLE,
            Error::RegistryInconsistency(_) => error_codes::REGISTRY_INCONSISTENCY,
            Error::ProtocolError(_) => error_codes::INVALID_PARAMS,
            Error::SerializationError(_) => error_codes::PARSE_ERROR,
            _ => error_codes::INTERNAL_ERROR,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyMatched(EndpointId::from("a"));
        assert_eq!(err.to_string(), "Endpoint a is already matched");
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::NoPartner(EndpointId::from("a")).is_recoverable());
        assert!(Error::AlreadyMatched(EndpointId::from("a")).is_recoverable());
        assert!(!Error::InvalidConfig("x".to_string()).is_recoverable());
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(
            Error::NoPartner(EndpointId::from("a")).rpc_code(),
            error_codes::NO_PARTNER
        );
        assert_eq!(
            Error::InvalidConfig("x".to_string()).rpc_code(),
            error_codes::INTERNAL_ERROR
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::SerializationError(_)));
    }
}
