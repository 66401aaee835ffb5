//! WebSocket signaling client
//!
//! Speaks JSON-RPC 2.0 to the signaling server: assigns request ids, keeps
//! the connection alive with periodic `heartbeat` notifications, and surfaces
//! server notifications as typed [`ServerEvent`]s.

use crate::config::PeerConfig;
use crate::transport::SignalSink;
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::{
    ClientEvent, EndpointAttributes, EndpointId, ErrorObject, MatchPreferences, RegistryStats,
    ServerEvent, ServerMessage, SignalKind,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type ResponseSender = oneshot::Sender<std::result::Result<Value, ErrorObject>>;
type PendingRequests = Arc<Mutex<HashMap<u64, ResponseSender>>>;

/// Outcome of a `find-partner` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindStatus {
    /// Queued in the waiting pool; `matched` arrives later
    Waiting,
    /// Paired immediately
    Matched {
        partner: EndpointId,
        is_initiator: bool,
    },
}

impl FindStatus {
    fn from_result(result: &Value) -> Result<Self> {
        match result.get("status").and_then(Value::as_str) {
            Some("waiting") => Ok(FindStatus::Waiting),
            Some("matched") => {
                let partner = result
                    .get("partner")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::SignalingError("matched result without partner".to_string())
                    })?;
                let is_initiator = result
                    .get("isInitiator")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Ok(FindStatus::Matched {
                    partner: EndpointId::from(partner),
                    is_initiator,
                })
            }
            other => Err(Error::SignalingError(format!(
                "unexpected find-partner status: {:?}",
                other
            ))),
        }
    }
}

/// Connected JSON-RPC client for the signaling server
pub struct SignalingClient {
    endpoint_id: EndpointId,
    attributes: EndpointAttributes,
    outbound_tx: mpsc::UnboundedSender<Message>,
    pending: PendingRequests,
    next_id: AtomicU64,
    request_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalingClient {
    /// Connect to the signaling server
    ///
    /// Retries the WebSocket handshake per `config.reconnection`, then waits
    /// for the `connection-info` greeting that carries this endpoint's id.
    ///
    /// # Returns
    ///
    /// The client and the stream of remaining server notifications. The
    /// stream ends when the connection closes.
    pub async fn connect(
        config: &PeerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        config.validate()?;

        let ws_stream = Self::connect_with_retry(config).await?;
        let (write, read) = ws_stream.split();

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);
        let pending: PendingRequests = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(Self::sender_task(
            write,
            outbound_rx,
            config.heartbeat_interval(),
            shutdown_tx.subscribe(),
        ));
        tokio::spawn(Self::receiver_task(read, pending.clone(), events_tx));

        let greeting = tokio::time::timeout(config.request_timeout(), events_rx.recv())
            .await
            .map_err(|_| Error::RequestTimeout("connection-info".to_string()))?;
        let (endpoint_id, attributes) = match greeting {
            Some(ServerEvent::ConnectionInfo { id, attributes, .. }) => (id, attributes),
            Some(other) => {
                return Err(Error::SignalingError(format!(
                    "expected connection-info, got {}",
                    other.method()
                )))
            }
            None => return Err(Error::SessionClosed),
        };
        info!("Registered with signaling server as {}", endpoint_id);

        let client = Self {
            endpoint_id,
            attributes,
            outbound_tx,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: config.request_timeout(),
            shutdown_tx,
        };
        Ok((client, events_rx))
    }

    async fn connect_with_retry(config: &PeerConfig) -> Result<WsStream> {
        let policy = &config.reconnection;
        let mut attempt = 0;

        loop {
            info!("Connecting to signaling server: {}", config.signaling_url);
            match connect_async(config.signaling_url.as_str()).await {
                Ok((ws_stream, _)) => {
                    info!("Connected to signaling server");
                    return Ok(ws_stream);
                }
                Err(e) if policy.should_retry(attempt) => {
                    let backoff = policy.calculate_backoff(attempt);
                    warn!(
                        "Signaling connection failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt + 1,
                        policy.max_retries,
                        e,
                        backoff
                    );
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    error!("Giving up on signaling server after {} retries: {}", attempt, e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Sender task: writes queued frames and periodic heartbeats
    async fn sender_task(
        mut write: SplitSink<WsStream, Message>,
        mut outbound_rx: mpsc::UnboundedReceiver<Message>,
        heartbeat: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

        loop {
            let msg = tokio::select! {
                msg = outbound_rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
                _ = ticker.tick() => {
                    match ClientEvent::Heartbeat.into_request(None).and_then(|r| r.to_json()) {
                        Ok(json) => Message::Text(json),
                        Err(e) => {
                            warn!("Failed to encode heartbeat: {}", e);
                            continue;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            };

            if let Err(e) = write.send(msg).await {
                error!("Failed to send WebSocket message: {}", e);
                break;
            }
        }

        debug!("Sender task terminated");
    }

    /// Receiver task: resolves pending requests and forwards notifications
    async fn receiver_task(
        mut read: SplitStream<WsStream>,
        pending: PendingRequests,
        events_tx: mpsc::UnboundedSender<ServerEvent>,
    ) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = Self::handle_message(&text, &pending, &events_tx) {
                        warn!("Failed to handle signaling message: {}", e);
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("WebSocket connection closed");
                    break;
                }
                Err(e) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        // Outstanding requests resolve as `SessionClosed`
        pending.lock().clear();
        debug!("Receiver task terminated");
    }

    fn handle_message(
        text: &str,
        pending: &PendingRequests,
        events_tx: &mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<()> {
        match ServerMessage::from_json(text)? {
            ServerMessage::Notification(request) => {
                let event = ServerEvent::from_notification(&request)?;
                debug!("Received {} notification", event.method());
                let _ = events_tx.send(event);
            }
            ServerMessage::Response(response) => {
                Self::resolve(pending, &response.id, Ok(response.result));
            }
            ServerMessage::Error(err) => {
                if err.id.is_null() {
                    warn!(
                        "Server error without request id: {} ({})",
                        err.error.message, err.error.code
                    );
                } else {
                    Self::resolve(pending, &err.id, Err(err.error));
                }
            }
        }
        Ok(())
    }

    fn resolve(
        pending: &PendingRequests,
        id: &Value,
        outcome: std::result::Result<Value, ErrorObject>,
    ) {
        let waiter = id.as_u64().and_then(|id| pending.lock().remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(outcome);
            }
            None => debug!("Response for unknown request {}", id),
        }
    }

    fn send_frame(&self, event: ClientEvent, id: Option<u64>) -> Result<()> {
        let json = event.into_request(id.map(|id| json!(id)))?.to_json()?;
        self.outbound_tx
            .send(Message::Text(json))
            .map_err(|_| Error::SessionClosed)
    }

    /// Send a request and wait for its result
    ///
    /// # Errors
    ///
    /// - `Rpc` when the server answers with a JSON-RPC error
    /// - `RequestTimeout` when no answer arrives in time
    /// - `SessionClosed` when the connection drops first
    pub async fn request(&self, event: ClientEvent) -> Result<Value> {
        let method = event.method();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send_frame(event, Some(id)) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::RequestTimeout(method.to_string()))
            }
            Ok(Err(_)) => Err(Error::SessionClosed),
            Ok(Ok(Err(error))) => Err(Error::Rpc {
                code: error.code,
                message: error.message,
            }),
            Ok(Ok(Ok(result))) => Ok(result),
        }
    }

    /// Send a notification (no response)
    pub fn notify(&self, event: ClientEvent) -> Result<()> {
        self.send_frame(event, None)
    }

    /// Enter the waiting pool or get paired immediately
    pub async fn find_partner(&self, preferences: Option<MatchPreferences>) -> Result<FindStatus> {
        let result = self.request(ClientEvent::FindPartner(preferences)).await?;
        FindStatus::from_result(&result)
    }

    /// Leave the pool or the current match; returns the former partner
    pub async fn leave_chat(&self) -> Result<Option<EndpointId>> {
        let result = self.request(ClientEvent::LeaveChat).await?;
        Ok(result
            .get("formerPartner")
            .and_then(Value::as_str)
            .map(EndpointId::from))
    }

    pub async fn set_attributes(&self, attributes: EndpointAttributes) -> Result<()> {
        self.request(ClientEvent::SetAttributes(attributes)).await?;
        Ok(())
    }

    pub async fn set_username(&self, name: impl Into<String>) -> Result<()> {
        self.request(ClientEvent::SetUsername(name.into())).await?;
        Ok(())
    }

    pub async fn heartbeat(&self) -> Result<()> {
        self.request(ClientEvent::Heartbeat).await?;
        Ok(())
    }

    /// Server counters (same as `GET /health`)
    pub async fn stats(&self) -> Result<RegistryStats> {
        let result = self.request(ClientEvent::Stats).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Id assigned by the server on connect
    pub fn endpoint_id(&self) -> &EndpointId {
        &self.endpoint_id
    }

    /// Attributes reported in the `connection-info` greeting
    pub fn attributes(&self) -> &EndpointAttributes {
        &self.attributes
    }

    /// Close the WebSocket; the server disconnects this endpoint
    pub fn close(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl SignalSink for SignalingClient {
    async fn send_signal(&self, kind: SignalKind, payload: Value) -> Result<()> {
        self.notify(ClientEvent::Signal { kind, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_status_waiting() {
        let status = FindStatus::from_result(&json!({"status": "waiting"})).unwrap();
        assert_eq!(status, FindStatus::Waiting);
    }

    #[test]
    fn test_find_status_matched() {
        let status = FindStatus::from_result(
            &json!({"status": "matched", "partner": "abc", "isInitiator": true}),
        )
        .unwrap();
        assert_eq!(
            status,
            FindStatus::Matched {
                partner: EndpointId::from("abc"),
                is_initiator: true
            }
        );
    }

    #[test]
    fn test_find_status_rejects_unknown() {
        assert!(FindStatus::from_result(&json!({"status": "idle"})).is_err());
        assert!(FindStatus::from_result(&json!({"status": "matched"})).is_err());
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let config = PeerConfig::default()
            .with_signaling_url("ws://127.0.0.1:1")
            .with_reconnection(crate::ReconnectionPolicy {
                max_retries: 1,
                backoff_initial_ms: 10,
                backoff_max_ms: 10,
                ..Default::default()
            });
        let err = SignalingClient::connect(&config).await.err().unwrap();
        assert!(matches!(err, Error::WebSocket(_)));
    }
}
