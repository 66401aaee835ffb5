//! WebSocket connection handler for JSON-RPC 2.0 signaling
//!
//! Each accepted socket becomes one registered endpoint. A writer task owns
//! the sink and drains both the endpoint's registry outbox (notifications)
//! and a local channel (responses, pongs); the read loop parses requests and
//! dispatches them to the registry and relay.

use crate::config::SignalingServerConfig;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tandem_core::protocol::error_codes;
use tandem_core::{
    outbox, ClientEvent, EndpointAttributes, EndpointId, FindOutcome, Inbox, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, Registry, SignalingRelay,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Shared state across all WebSocket connections
pub struct SharedState {
    pub registry: Arc<Registry>,
    pub relay: SignalingRelay,
    pub config: Arc<SignalingServerConfig>,
}

impl SharedState {
    pub fn new(registry: Arc<Registry>, config: Arc<SignalingServerConfig>) -> Self {
        Self {
            relay: SignalingRelay::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }
}

/// Handle a WebSocket connection until it closes or the server shuts down
pub async fn handle_connection(
    stream: TcpStream,
    state: Arc<SharedState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> crate::Result<()> {
    let addr = stream.peer_addr()?;
    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let buffer = state.registry.config().outbound_buffer;
    let (events_tx, events_rx) = outbox(buffer);
    let (direct_tx, mut direct_rx) = mpsc::channel::<Message>(buffer);

    let endpoint_id = EndpointId::generate();
    state.registry.register_from(
        endpoint_id.clone(),
        EndpointAttributes::default(),
        events_tx,
        Some(addr.to_string()),
    )?;
    info!("Endpoint {} connected from {}", endpoint_id, addr);

    // Writer: notifications from the registry and direct replies
    let writer_id = endpoint_id.clone();
    let writer = tokio::spawn(async move {
        let mut events_rx: Inbox = events_rx;
        loop {
            let message = tokio::select! {
                biased;
                Some(event) = events_rx.recv() => {
                    match event.to_notification().and_then(|n| n.to_json()) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            error!("Failed to encode {} for {}: {}", event.method(), writer_id, e);
                            continue;
                        }
                    }
                }
                Some(message) = direct_rx.recv() => message,
                else => break,
            };

            if let Err(e) = ws_tx.send(message).await {
                debug!("WebSocket send to {} failed: {}", writer_id, e);
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let handled = handle_message(&text, &endpoint_id, &state);
                        if let Some(reply) = handled.reply {
                            if direct_tx.send(Message::Text(reply)).await.is_err() {
                                break;
                            }
                        }
                        if handled.close {
                            info!("Closing connection for {} ({})", endpoint_id, addr);
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = direct_tx.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket connection closed by client: {}", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            _ = shutdown_rx.recv() => {
                debug!("Closing {} for server shutdown", endpoint_id);
                break;
            }
        }
    }

    // Dropping the registry entry drops the outbox sender, which ends the writer
    state.registry.disconnect(&endpoint_id);
    drop(direct_tx);
    let _ = writer.await;

    Ok(())
}

/// Outcome of one inbound text frame
#[derive(Debug, Default)]
pub struct Handled {
    /// Serialized response or error, if one is due
    pub reply: Option<String>,
    /// The endpoint can no longer be served; close after sending `reply`
    pub close: bool,
}

impl Handled {
    fn reply(reply: Option<String>) -> Self {
        Self {
            reply,
            close: false,
        }
    }
}

/// Handle one text frame
///
/// Requests (frames with an `id`) always get a response or an error;
/// notifications only get a reply when the frame itself is unusable.
/// Errors the endpoint cannot recover from, such as having been evicted,
/// also ask the caller to close the socket.
pub fn handle_message(text: &str, endpoint_id: &EndpointId, state: &SharedState) -> Handled {
    if text.len() > state.config.max_message_bytes {
        warn!(
            "Rejecting {} byte frame from {} (limit {})",
            text.len(),
            endpoint_id,
            state.config.max_message_bytes
        );
        return Handled::reply(encode_error(JsonRpcError::new(
            error_codes::MESSAGE_TOO_LARGE,
            format!(
                "Message exceeds {} bytes",
                state.config.max_message_bytes
            ),
            Value::Null,
        )));
    }

    let request = match JsonRpcRequest::from_json(text) {
        Ok(request) => request,
        Err(e) => {
            debug!("Unparseable frame from {}: {}", endpoint_id, e);
            return Handled::reply(encode_error(JsonRpcError::new(
                error_codes::PARSE_ERROR,
                e.to_string(),
                Value::Null,
            )));
        }
    };

    let id = request.id.clone();
    let event = match ClientEvent::from_request(&request) {
        Ok(event) => event,
        Err(e) => {
            let code = if matches!(e, tandem_core::Error::ProtocolError(_)) {
                error_codes::METHOD_NOT_FOUND
            } else {
                error_codes::INVALID_PARAMS
            };
            return Handled::reply(encode_error(JsonRpcError::new(
                code,
                e.to_string(),
                id.unwrap_or(Value::Null),
            )));
        }
    };

    debug!("{} -> {}", endpoint_id, event.method());
    let result = dispatch(event, endpoint_id, state);

    let close = match &result {
        Err(e) if !e.is_recoverable() => {
            warn!("Unrecoverable error for {}: {}", endpoint_id, e);
            true
        }
        _ => false,
    };

    let reply = match (id, result) {
        (None, _) => None,
        (Some(id), Ok(value)) => JsonRpcResponse::new(value, id)
            .to_json()
            .map_err(|e| error!("Failed to encode response: {}", e))
            .ok(),
        (Some(id), Err(e)) => encode_error(JsonRpcError::from_error(&e, id)),
    };
    Handled { reply, close }
}

/// Apply one client operation to the registry or relay
fn dispatch(
    event: ClientEvent,
    endpoint_id: &EndpointId,
    state: &SharedState,
) -> tandem_core::Result<Value> {
    let registry = &state.registry;
    match event {
        ClientEvent::Heartbeat => {
            registry.heartbeat(endpoint_id)?;
            Ok(json!({ "ok": true }))
        }
        ClientEvent::SetAttributes(attributes) => {
            registry.set_attributes(endpoint_id, attributes)?;
            Ok(json!({ "ok": true }))
        }
        ClientEvent::SetUsername(name) => {
            registry.set_display_name(endpoint_id, name)?;
            Ok(json!({ "ok": true }))
        }
        ClientEvent::FindPartner(preferences) => {
            match registry.find_partner(endpoint_id, preferences.as_ref())? {
                FindOutcome::Waiting => Ok(json!({ "status": "waiting" })),
                FindOutcome::Matched {
                    partner,
                    is_initiator,
                } => Ok(json!({
                    "status": "matched",
                    "partner": partner,
                    "isInitiator": is_initiator,
                })),
            }
        }
        ClientEvent::LeaveChat => {
            let partner = registry.leave(endpoint_id)?;
            Ok(json!({ "status": "idle", "formerPartner": partner }))
        }
        ClientEvent::Signal { kind, payload } => {
            let message = state.relay.forward(endpoint_id, kind, payload)?;
            Ok(json!({ "delivered": true, "to": message.to }))
        }
        ClientEvent::Stats => Ok(serde_json::to_value(registry.stats())?),
    }
}

fn encode_error(error: JsonRpcError) -> Option<String> {
    error
        .to_json()
        .map_err(|e| error!("Failed to encode error response: {}", e))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_core::{MatchmakingConfig, ServerEvent};

    fn state() -> SharedState {
        let registry = Arc::new(Registry::new(MatchmakingConfig::default()).unwrap());
        SharedState::new(registry, Arc::new(SignalingServerConfig::local()))
    }

    fn register(state: &SharedState, name: &str) -> (EndpointId, Inbox) {
        let id = EndpointId::from(name);
        let (tx, rx) = outbox(16);
        state
            .registry
            .register(id.clone(), EndpointAttributes::default(), tx)
            .unwrap();
        (id, rx)
    }

    fn reply(text: &str, id: &EndpointId, state: &SharedState) -> Value {
        serde_json::from_str(&handle_message(text, id, state).reply.unwrap()).unwrap()
    }

    #[test]
    fn test_find_partner_request_gets_response() {
        let state = state();
        let (a, _rx) = register(&state, "a");

        let response = reply(
            r#"{"jsonrpc":"2.0","method":"find-partner","id":1}"#,
            &a,
            &state,
        );
        assert_eq!(response["result"]["status"], "waiting");
        assert_eq!(response["id"], 1);
    }

    #[test]
    fn test_notification_gets_no_reply() {
        let state = state();
        let (a, _rx) = register(&state, "a");
        let handled = handle_message(r#"{"jsonrpc":"2.0","method":"heartbeat"}"#, &a, &state);
        assert!(handled.reply.is_none());
        assert!(!handled.close);
    }

    #[test]
    fn test_evicted_endpoint_is_closed() {
        let state = state();
        let (a, _rx) = register(&state, "a");
        assert!(state.registry.unregister(&a));

        let handled = handle_message(
            r#"{"jsonrpc":"2.0","method":"find-partner","id":3}"#,
            &a,
            &state,
        );
        assert!(handled.close);
        let response: Value = serde_json::from_str(&handled.reply.unwrap()).unwrap();
        assert_eq!(response["error"]["code"], error_codes::ENDPOINT_NOT_FOUND);

        // Notifications close too, without a reply
        let handled = handle_message(r#"{"jsonrpc":"2.0","method":"heartbeat"}"#, &a, &state);
        assert!(handled.reply.is_none());
        assert!(handled.close);
    }

    #[test]
    fn test_signal_without_partner_is_error() {
        let state = state();
        let (a, _rx) = register(&state, "a");

        let handled = handle_message(
            r#"{"jsonrpc":"2.0","method":"offer","params":{"payload":{"sdp":"x"}},"id":"o1"}"#,
            &a,
            &state,
        );
        assert!(!handled.close);
        let response: Value = serde_json::from_str(&handled.reply.unwrap()).unwrap();
        assert_eq!(response["error"]["code"], error_codes::NO_PARTNER);
        assert_eq!(response["id"], "o1");
    }

    #[test]
    fn test_unknown_method_and_bad_json() {
        let state = state();
        let (a, _rx) = register(&state, "a");

        let response = reply(r#"{"jsonrpc":"2.0","method":"teleport","id":2}"#, &a, &state);
        assert_eq!(response["error"]["code"], error_codes::METHOD_NOT_FOUND);

        let response = reply("{nope", &a, &state);
        assert_eq!(response["error"]["code"], error_codes::PARSE_ERROR);
    }

    #[test]
    fn test_oversized_frame_is_rejected() {
        let registry = Arc::new(Registry::new(MatchmakingConfig::default()).unwrap());
        let config = SignalingServerConfig::local().with_max_message_bytes(64);
        let state = SharedState::new(registry, Arc::new(config));
        let (a, mut rx) = register(&state, "a");
        rx.try_recv().unwrap();

        let big = format!(
            r#"{{"jsonrpc":"2.0","method":"offer","params":{{"payload":"{}"}}}}"#,
            "x".repeat(128)
        );
        let response = reply(&big, &a, &state);
        assert_eq!(response["error"]["code"], error_codes::MESSAGE_TOO_LARGE);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_relayed_offer_reaches_partner() {
        let state = state();
        let (a, _rx_a) = register(&state, "a");
        let (b, mut rx_b) = register(&state, "b");
        handle_message(r#"{"jsonrpc":"2.0","method":"find-partner"}"#, &a, &state);
        handle_message(r#"{"jsonrpc":"2.0","method":"find-partner"}"#, &b, &state);
        while rx_b.try_recv().is_ok() {}

        handle_message(
            r#"{"jsonrpc":"2.0","method":"offer","params":{"payload":{"sdp":"x"}}}"#,
            &a,
            &state,
        );
        match rx_b.try_recv().unwrap() {
            ServerEvent::Signal { payload, from, .. } => {
                assert_eq!(payload, json!({"sdp": "x"}));
                assert_eq!(from, a);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
