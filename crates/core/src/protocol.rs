//! JSON-RPC 2.0 signaling protocol types
//!
//! Client to server traffic is a request (with `id`, answered by a response)
//! or a notification (without `id`, fire-and-forget). Server to client traffic
//! is always a notification, see [`crate::events::ServerEvent`].

use crate::endpoint::{EndpointAttributes, MatchPreferences};
use crate::events::{SignalKind, SignalParams};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC 2.0 protocol version
pub const JSONRPC_VERSION: &str = "2.0";

/// Wire method names
pub mod methods {
    // Client -> server
    pub const HEARTBEAT: &str = "heartbeat";
    pub const SET_ATTRIBUTES: &str = "set-attributes";
    pub const SET_USERNAME: &str = "set-username";
    pub const FIND_PARTNER: &str = "find-partner";
    pub const LEAVE_CHAT: &str = "leave-chat";
    pub const STATS: &str = "stats";

    // Both directions
    pub const OFFER: &str = "offer";
    pub const ANSWER: &str = "answer";
    pub const ICE_CANDIDATE: &str = "ice-candidate";

    // Server -> client
    pub const CONNECTION_INFO: &str = "connection-info";
    pub const MATCHED: &str = "matched";
    pub const PEER_DISCONNECTED: &str = "peer-disconnected";
}

/// JSON-RPC 2.0 request or notification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Method name to invoke
    pub method: String,

    /// Method parameters
    #[serde(default)]
    pub params: Value,

    /// Request ID for matching with response (absent for notifications)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response (success)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Result data
    pub result: Value,

    /// Request ID this response corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Protocol version (must be "2.0")
    pub jsonrpc: String,

    /// Error details
    pub error: ErrorObject,

    /// Request ID this error corresponds to
    pub id: Value,
}

/// JSON-RPC 2.0 error object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorObject {
    /// Error code
    pub code: i32,

    /// Human-readable error message
    pub message: String,

    /// Additional error data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Standard JSON-RPC 2.0 error codes
pub mod error_codes {
    /// Invalid JSON was received
    pub const PARSE_ERROR: i32 = -32700;

    /// The JSON sent is not a valid Request object
    pub const INVALID_REQUEST: i32 = -32600;

    /// The method does not exist / is not available
    pub const METHOD_NOT_FOUND: i32 = -32601;

    /// Invalid method parameter(s)
    pub const INVALID_PARAMS: i32 = -32602;

    /// Internal JSON-RPC error
    pub const INTERNAL_ERROR: i32 = -32603;

    // Matchmaking-specific error codes

    /// Endpoint not found in registry
    pub const ENDPOINT_NOT_FOUND: i32 = -32000;

    /// find-partner while already partnered
    pub const ALREADY_MATCHED: i32 = -32001;

    /// Signaling message without a partner
    pub const NO_PARTNER: i32 = -32002;

    /// Partner channel full or closed
    pub const RECIPIENT_UNREACHABLE: i32 = -32003;

    /// Asymmetric partner link was repaired by unpairing
    pub const REGISTRY_INCONSISTENCY: i32 = -32004;

    /// Frame exceeds the configured maximum size
    pub const MESSAGE_TOO_LARGE: i32 = -32005;
}

/// Any message a client can receive from the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Notification(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
}

impl ServerMessage {
    /// Classify a raw text frame
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)?;
        if value.get("method").is_some() {
            Ok(ServerMessage::Notification(serde_json::from_value(value)?))
        } else if value.get("error").is_some() {
            Ok(ServerMessage::Error(serde_json::from_value(value)?))
        } else if value.get("result").is_some() {
            Ok(ServerMessage::Response(serde_json::from_value(value)?))
        } else {
            Err(Error::ProtocolError(
                "Frame is neither notification nor response".to_string(),
            ))
        }
    }
}

/// Operation requested by a client frame
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Heartbeat,
    SetAttributes(EndpointAttributes),
    /// Legacy form that only sets the display name
    SetUsername(String),
    FindPartner(Option<MatchPreferences>),
    LeaveChat,
    Signal { kind: SignalKind, payload: Value },
    Stats,
}

#[derive(Debug, Deserialize)]
struct UsernameParams {
    username: String,
}

impl ClientEvent {
    /// Interpret a parsed request
    ///
    /// # Errors
    ///
    /// Returns `ProtocolError` for an unknown method and `SerializationError`
    /// when params do not match the method.
    pub fn from_request(request: &JsonRpcRequest) -> Result<Self> {
        let params = &request.params;
        let event = match request.method.as_str() {
            methods::HEARTBEAT => ClientEvent::Heartbeat,
            methods::LEAVE_CHAT => ClientEvent::LeaveChat,
            methods::STATS => ClientEvent::Stats,
            methods::SET_ATTRIBUTES => {
                ClientEvent::SetAttributes(serde_json::from_value(params.clone())?)
            }
            methods::SET_USERNAME => {
                // Accept both `"name"` and `{"username": "name"}`
                let name = match params {
                    Value::String(s) => s.clone(),
                    other => serde_json::from_value::<UsernameParams>(other.clone())?.username,
                };
                ClientEvent::SetUsername(name)
            }
            methods::FIND_PARTNER => {
                if params.is_null() {
                    ClientEvent::FindPartner(None)
                } else {
                    ClientEvent::FindPartner(Some(serde_json::from_value(params.clone())?))
                }
            }
            other => match SignalKind::from_method(other) {
                Some(kind) => {
                    let p: SignalParams = serde_json::from_value(params.clone())?;
                    ClientEvent::Signal {
                        kind,
                        payload: p.payload,
                    }
                }
                None => {
                    return Err(Error::ProtocolError(format!("Unknown method: {}", other)));
                }
            },
        };
        Ok(event)
    }

    pub fn method(&self) -> &'static str {
        match self {
            ClientEvent::Heartbeat => methods::HEARTBEAT,
            ClientEvent::SetAttributes(_) => methods::SET_ATTRIBUTES,
            ClientEvent::SetUsername(_) => methods::SET_USERNAME,
            ClientEvent::FindPartner(_) => methods::FIND_PARTNER,
            ClientEvent::LeaveChat => methods::LEAVE_CHAT,
            ClientEvent::Signal { kind, .. } => kind.method(),
            ClientEvent::Stats => methods::STATS,
        }
    }

    /// Encode as a request (`Some(id)`) or notification (`None`)
    pub fn into_request(self, id: Option<Value>) -> Result<JsonRpcRequest> {
        let method = self.method();
        let params = match self {
            ClientEvent::Heartbeat | ClientEvent::LeaveChat | ClientEvent::Stats => Value::Null,
            ClientEvent::SetAttributes(attrs) => serde_json::to_value(attrs)?,
            ClientEvent::SetUsername(name) => serde_json::json!({ "username": name }),
            ClientEvent::FindPartner(prefs) => match prefs {
                Some(prefs) => serde_json::to_value(prefs)?,
                None => Value::Null,
            },
            ClientEvent::Signal { payload, .. } => {
                serde_json::to_value(SignalParams { payload, from: None })?
            }
        };
        Ok(JsonRpcRequest::new(method, params, id))
    }
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(method: impl Into<String>, params: Value, id: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }

    /// Create a notification (no id, no response expected)
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::new(method, params, None)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC request: {}", e))
        })
    }

    /// Parse from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let request: Self = serde_json::from_str(json).map_err(|e| {
            Error::SerializationError(format!("Failed to deserialize JSON-RPC request: {}", e))
        })?;
        if request.jsonrpc != JSONRPC_VERSION {
            return Err(Error::ProtocolError(format!(
                "Unsupported jsonrpc version: {}",
                request.jsonrpc
            )));
        }
        Ok(request)
    }
}

impl JsonRpcResponse {
    /// Create a new JSON-RPC response
    pub fn new(result: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result,
            id,
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC response: {}", e))
        })
    }
}

impl JsonRpcError {
    /// Create a new JSON-RPC error
    pub fn new(code: i32, message: impl Into<String>, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message: message.into(),
                data: None,
            },
            id,
        }
    }

    /// Create a new JSON-RPC error with data
    pub fn with_data(code: i32, message: impl Into<String>, data: Value, id: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: ErrorObject {
                code,
                message: message.into(),
                data: Some(data),
            },
            id,
        }
    }

    /// Build the error response for a core error
    pub fn from_error(err: &Error, id: Value) -> Self {
        Self::new(err.rpc_code(), err.to_string(), id)
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            Error::SerializationError(format!("Failed to serialize JSON-RPC error: {}", e))
        })
    }
}
