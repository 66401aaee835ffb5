//! Match session: one signaling connection plus one coordinator
//!
//! The session issues find/leave against the signaling client and routes
//! `matched`, relayed signals and `peer-disconnected` into the coordinator.
//! A `matched` that arrives while a `leave-chat` is still unacknowledged is
//! ignored; the server dissolves that match when it processes the leave.

use crate::client::{FindStatus, SignalingClient};
use crate::config::PeerConfig;
use crate::coordinator::{CoordinatorHandle, PeerCoordinator, PeerState};
use crate::rtc::WebRtcTransportFactory;
use crate::transport::{LocalMedia, TransportFactory};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tandem_core::{EndpointId, MatchPreferences, PartnerSummary, ServerEvent};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

type LeaveResult = Result<Option<EndpointId>>;

enum Command {
    Leave(oneshot::Sender<LeaveResult>),
}

/// Client-side session for one anonymous chat user
pub struct MatchSession {
    client: Arc<SignalingClient>,
    coordinator: CoordinatorHandle,
    commands_tx: mpsc::UnboundedSender<Command>,
    partner: Arc<Mutex<Option<PartnerSummary>>>,
}

impl MatchSession {
    /// Connect with the default `webrtc` transport
    pub async fn connect(config: &PeerConfig) -> Result<Self> {
        let factory = Arc::new(WebRtcTransportFactory::new(config)?);
        Self::start(config, factory).await
    }

    /// Connect to the signaling server and spawn the coordinator
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the signaling
    /// server cannot be reached within the reconnection policy.
    pub async fn start(config: &PeerConfig, factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let (client, events) = SignalingClient::connect(config).await?;
        let client = Arc::new(client);
        let coordinator = PeerCoordinator::spawn(config, factory, client.clone());
        let partner = Arc::new(Mutex::new(None));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let router = Router {
            client: client.clone(),
            coordinator: coordinator.clone(),
            partner: partner.clone(),
        };
        tokio::spawn(router.run(events, commands_rx));

        Ok(Self {
            client,
            coordinator,
            commands_tx,
            partner,
        })
    }

    pub fn endpoint_id(&self) -> &EndpointId {
        self.client.endpoint_id()
    }

    /// Underlying signaling client (attributes, username, stats)
    pub fn client(&self) -> &SignalingClient {
        &self.client
    }

    pub fn coordinator(&self) -> &CoordinatorHandle {
        &self.coordinator
    }

    /// Start searching; the match itself is announced by `matched`
    pub async fn find_partner(&self, preferences: Option<MatchPreferences>) -> Result<FindStatus> {
        let status = self.client.find_partner(preferences).await?;
        debug!("find-partner: {:?}", status);
        Ok(status)
    }

    /// Leave the pool or the current chat
    ///
    /// Local peer resources are released before the server acknowledges.
    /// Returns the former partner, if there was one.
    pub async fn leave(&self) -> Result<Option<EndpointId>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands_tx
            .send(Command::Leave(reply_tx))
            .map_err(|_| Error::SessionClosed)?;
        reply_rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Hand the local camera/microphone stream to the coordinator
    pub fn set_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()> {
        self.coordinator.set_local_media(media)
    }

    /// Current partner, if matched
    pub fn partner(&self) -> Option<PartnerSummary> {
        self.partner.lock().clone()
    }

    pub fn state(&self) -> PeerState {
        self.coordinator.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.coordinator.subscribe()
    }

    /// Release peer resources and close the signaling connection
    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
        self.client.close();
        info!("Session {} closed", self.client.endpoint_id());
    }
}

/// Serializes server events and leave commands for one session
struct Router {
    client: Arc<SignalingClient>,
    coordinator: CoordinatorHandle,
    partner: Arc<Mutex<Option<PartnerSummary>>>,
}

impl Router {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<ServerEvent>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        let mut leave_ack: Option<oneshot::Receiver<LeaveResult>> = None;
        let mut leave_reply: Option<oneshot::Sender<LeaveResult>> = None;

        loop {
            tokio::select! {
                // Events first: anything the server sent before the leave
                // acknowledgement is handled while the leave is still pending
                biased;

                event = events.recv() => match event {
                    Some(event) => self.on_event(event, leave_ack.is_some()),
                    None => break,
                },

                Some(result) = async {
                    match leave_ack.as_mut() {
                        Some(rx) => Some(rx.await.unwrap_or(Err(Error::SessionClosed))),
                        None => None,
                    }
                }, if leave_ack.is_some() => {
                    leave_ack = None;
                    if let Some(reply) = leave_reply.take() {
                        let _ = reply.send(result);
                    }
                }

                command = commands.recv() => match command {
                    Some(Command::Leave(reply)) => {
                        if leave_ack.is_some() {
                            let _ = reply.send(Ok(None));
                            continue;
                        }
                        leave_ack = Some(self.start_leave());
                        leave_reply = Some(reply);
                    }
                    None => break,
                },
            }
        }

        debug!("Session router stopped");
        let _ = self.coordinator.leave();
        if let Some(reply) = leave_reply.take() {
            let _ = reply.send(Err(Error::SessionClosed));
        }
    }

    fn start_leave(&self) -> oneshot::Receiver<LeaveResult> {
        info!("Leaving chat");
        self.partner.lock().take();
        if let Err(e) = self.coordinator.leave() {
            warn!("Coordinator unavailable during leave: {}", e);
        }

        let (tx, rx) = oneshot::channel();
        let client = self.client.clone();
        tokio::spawn(async move {
            let _ = tx.send(client.leave_chat().await);
        });
        rx
    }

    fn on_event(&self, event: ServerEvent, leaving: bool) {
        let result = match event {
            ServerEvent::Matched {
                is_initiator,
                partner,
            } => {
                if leaving {
                    info!("Ignoring match with {} while leave is pending", partner.id);
                    return;
                }
                info!(
                    "Matched with {} ({}), initiator: {}",
                    partner.id, partner.display_name, is_initiator
                );
                *self.partner.lock() = Some(partner);
                self.coordinator.matched(is_initiator)
            }
            ServerEvent::Signal {
                kind,
                payload,
                from,
            } => {
                let from_partner = self
                    .partner
                    .lock()
                    .as_ref()
                    .is_some_and(|partner| partner.id == from);
                if !from_partner {
                    debug!("Dropping {} from non-partner {}", kind.method(), from);
                    return;
                }
                self.coordinator.remote_signal(kind, payload)
            }
            ServerEvent::PeerDisconnected => {
                if let Some(partner) = self.partner.lock().take() {
                    info!("Partner {} disconnected", partner.id);
                }
                self.coordinator.peer_disconnected()
            }
            ServerEvent::ConnectionInfo { id, .. } => {
                debug!("Repeated connection-info for {}", id);
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Failed to route server event: {}", e);
        }
    }
}
