//! Outbound events delivered to endpoints
//!
//! Every endpoint owns one bounded channel of [`ServerEvent`]s. The registry
//! and relay only ever `try_send` into it, so delivery is at-most-once and a
//! slow or vanished endpoint can never block matchmaking.

use crate::endpoint::{EndpointAttributes, EndpointId, PartnerSummary};
use crate::protocol::{methods, JsonRpcRequest};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Sending half of an endpoint's outbound event channel
pub type Outbox = mpsc::Sender<ServerEvent>;

/// Receiving half of an endpoint's outbound event channel
pub type Inbox = mpsc::Receiver<ServerEvent>;

/// Create an outbound channel with the given capacity
pub fn outbox(capacity: usize) -> (Outbox, Inbox) {
    mpsc::channel(capacity)
}

/// Handshake message kinds carried by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    /// Wire method name for this kind
    pub fn method(&self) -> &'static str {
        match self {
            SignalKind::Offer => methods::OFFER,
            SignalKind::Answer => methods::ANSWER,
            SignalKind::IceCandidate => methods::ICE_CANDIDATE,
        }
    }

    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            methods::OFFER => Some(SignalKind::Offer),
            methods::ANSWER => Some(SignalKind::Answer),
            methods::ICE_CANDIDATE => Some(SignalKind::IceCandidate),
            _ => None,
        }
    }
}

/// One handshake message in transit between two partners
#[derive(Debug, Clone, PartialEq)]
pub struct SignalingMessage {
    pub kind: SignalKind,
    /// Opaque payload, never inspected by the relay
    pub payload: Value,
    pub from: EndpointId,
    pub to: EndpointId,
}

/// Events pushed from the server to one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Greeting sent right after the endpoint registers
    ConnectionInfo {
        id: EndpointId,
        attributes: EndpointAttributes,
        /// Milliseconds since the Unix epoch
        connected_at: u64,
        /// Peer address as seen by the server, when known
        remote_addr: Option<String>,
    },

    /// The endpoint has been paired
    Matched {
        is_initiator: bool,
        partner: PartnerSummary,
    },

    /// Relayed handshake message from the current partner
    Signal {
        kind: SignalKind,
        payload: Value,
        from: EndpointId,
    },

    /// The partner left, disconnected or was evicted
    PeerDisconnected,
}

/// Params of the `connection-info` notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfoParams {
    pub id: EndpointId,
    #[serde(default)]
    pub attributes: EndpointAttributes,
    pub connected_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
}

/// Params of the `matched` notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedParams {
    pub is_initiator: bool,
    pub partner: PartnerSummary,
}

/// Params of `offer` / `answer` / `ice-candidate` in both directions
///
/// `from` is absent on client requests and filled in by the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalParams {
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<EndpointId>,
}

impl ServerEvent {
    /// Wire method name of the notification carrying this event
    pub fn method(&self) -> &'static str {
        match self {
            ServerEvent::ConnectionInfo { .. } => methods::CONNECTION_INFO,
            ServerEvent::Matched { .. } => methods::MATCHED,
            ServerEvent::Signal { kind, .. } => kind.method(),
            ServerEvent::PeerDisconnected => methods::PEER_DISCONNECTED,
        }
    }

    /// Encode as a JSON-RPC 2.0 notification
    pub fn to_notification(&self) -> Result<JsonRpcRequest> {
        let params = match self {
            ServerEvent::ConnectionInfo {
                id,
                attributes,
                connected_at,
                remote_addr,
            } => serde_json::to_value(ConnectionInfoParams {
                id: id.clone(),
                attributes: attributes.clone(),
                connected_at: *connected_at,
                remote_addr: remote_addr.clone(),
            })?,
            ServerEvent::Matched {
                is_initiator,
                partner,
            } => serde_json::to_value(MatchedParams {
                is_initiator: *is_initiator,
                partner: partner.clone(),
            })?,
            ServerEvent::Signal { payload, from, .. } => serde_json::to_value(SignalParams {
                payload: payload.clone(),
                from: Some(from.clone()),
            })?,
            ServerEvent::PeerDisconnected => Value::Object(Default::default()),
        };

        Ok(JsonRpcRequest::notification(self.method(), params))
    }

    /// Decode a JSON-RPC notification received by a client
    pub fn from_notification(request: &JsonRpcRequest) -> Result<Self> {
        let params = request.params.clone();
        match request.method.as_str() {
            methods::CONNECTION_INFO => {
                let p: ConnectionInfoParams = serde_json::from_value(params)?;
                Ok(ServerEvent::ConnectionInfo {
                    id: p.id,
                    attributes: p.attributes,
                    connected_at: p.connected_at,
                    remote_addr: p.remote_addr,
                })
            }
            methods::MATCHED => {
                let p: MatchedParams = serde_json::from_value(params)?;
                Ok(ServerEvent::Matched {
                    is_initiator: p.is_initiator,
                    partner: p.partner,
                })
            }
            methods::PEER_DISCONNECTED => Ok(ServerEvent::PeerDisconnected),
            other => {
                let kind = SignalKind::from_method(other).ok_or_else(|| {
                    Error::ProtocolError(format!("Unknown notification: {}", other))
                })?;
                let p: SignalParams = serde_json::from_value(params)?;
                let from = p.from.ok_or_else(|| {
                    Error::ProtocolError(format!("{} notification without sender", other))
                })?;
                Ok(ServerEvent::Signal {
                    kind,
                    payload: p.payload,
                    from,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointAttributes;
    use serde_json::json;

    #[test]
    fn test_signal_kind_wire_names() {
        assert_eq!(SignalKind::IceCandidate.method(), "ice-candidate");
        assert_eq!(SignalKind::from_method("offer"), Some(SignalKind::Offer));
        assert_eq!(SignalKind::from_method("leave-chat"), None);
        assert_eq!(
            serde_json::to_value(SignalKind::IceCandidate).unwrap(),
            json!("ice-candidate")
        );
    }

    #[test]
    fn test_matched_notification_shape() {
        let event = ServerEvent::Matched {
            is_initiator: true,
            partner: PartnerSummary::snapshot(
                &EndpointId::from("b"),
                &EndpointAttributes::default(),
            ),
        };
        let notification = event.to_notification().unwrap();
        assert_eq!(notification.method, "matched");
        assert!(notification.id.is_none());
        assert_eq!(notification.params["isInitiator"], json!(true));
        assert_eq!(notification.params["partner"]["id"], json!("b"));
    }

    #[test]
    fn test_signal_payload_is_carried_verbatim() {
        let payload = json!({"sdp": "x", "nested": {"odd": [1, null, "z"]}});
        let event = ServerEvent::Signal {
            kind: SignalKind::Offer,
            payload: payload.clone(),
            from: EndpointId::from("a"),
        };
        let notification = event.to_notification().unwrap();
        assert_eq!(notification.params["payload"], payload);

        let decoded = ServerEvent::from_notification(&notification).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_unknown_notification_is_rejected() {
        let request = JsonRpcRequest::notification("bogus", json!({}));
        let err = ServerEvent::from_notification(&request).unwrap_err();
        assert!(matches!(err, Error::ProtocolError(_)));
    }
}
