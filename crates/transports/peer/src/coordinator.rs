//! Peer transport coordinator
//!
//! One coordinator runs per client session. It owns the negotiation state
//! machine and every input it reacts to (relayed messages, local commands,
//! transport callbacks) is serialized through a single channel consumed by
//! one tokio task.
//!
//! ```text
//!            matched(initiator)          transport connected
//!   Idle ───────────────────────▶ Negotiating ───────────────▶ Connected
//!    ▲   offer received ─────────▲     │                          │
//!    │                                 │ timeout / failure        │ disconnected
//!    │                                 ▼                          ▼
//!    │                       rebuild transport (retry)    ICE restart (initiator)
//!    │                                 │ budget exhausted
//!    │            leave / peer gone    ▼
//!    └──────────────────────────── Failed
//! ```

use crate::config::PeerConfig;
use crate::transport::{
    Generation, LocalMedia, PeerTransport, SignalSink, TransportEvent, TransportEventSink,
    TransportFactory,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tandem_core::SignalKind;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Negotiation state of the local peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerState {
    /// No partner, or waiting for the partner's offer
    #[default]
    Idle,
    /// Offer/answer exchange in progress
    Negotiating,
    /// Media path established
    Connected,
    /// Retry budget exhausted; stays here until the session leaves
    Failed,
    /// Coordinator shut down
    Closed,
}

impl PeerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }
}

/// Everything the coordinator task reacts to
pub(crate) enum Input {
    Matched { is_initiator: bool },
    Remote { kind: SignalKind, payload: Value },
    PeerDisconnected,
    Leave,
    AttachMedia(Arc<dyn LocalMedia>),
    Transport {
        generation: Generation,
        event: TransportEvent,
    },
    Shutdown,
}

/// Cloneable handle for feeding a running coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Input>,
    state_rx: watch::Receiver<PeerState>,
}

impl CoordinatorHandle {
    fn send(&self, input: Input) -> Result<()> {
        self.tx.send(input).map_err(|_| Error::SessionClosed)
    }

    /// The server paired this endpoint
    pub fn matched(&self, is_initiator: bool) -> Result<()> {
        self.send(Input::Matched { is_initiator })
    }

    /// A handshake message relayed from the partner
    pub fn remote_signal(&self, kind: SignalKind, payload: Value) -> Result<()> {
        self.send(Input::Remote { kind, payload })
    }

    pub fn peer_disconnected(&self) -> Result<()> {
        self.send(Input::PeerDisconnected)
    }

    /// Local user left the chat
    pub fn leave(&self) -> Result<()> {
        self.send(Input::Leave)
    }

    /// Hand over the local camera/microphone stream
    ///
    /// The coordinator stops it exactly once, on the next cleanup.
    pub fn set_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()> {
        self.send(Input::AttachMedia(media))
    }

    /// Current state
    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions (for the UI layer)
    pub fn subscribe(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    /// Wait until the coordinator reaches `target`
    ///
    /// # Errors
    ///
    /// `ConnectionTimeout` if `target` is not reached within `timeout`,
    /// `SessionClosed` if the coordinator stops first.
    pub async fn wait_for_state(&self, target: PeerState, timeout: Duration) -> Result<()> {
        let mut rx = self.state_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == target))
            .await
            .map_err(|_| Error::ConnectionTimeout(timeout))?
            .map_err(|_| Error::SessionClosed)?;
        Ok(())
    }

    /// Release everything and stop the coordinator task
    pub async fn shutdown(&self) {
        if self.send(Input::Shutdown).is_err() {
            return;
        }
        let mut rx = self.state_rx.clone();
        let _ = rx.wait_for(|state| *state == PeerState::Closed).await;
    }
}

/// Negotiation state machine driven by [`CoordinatorHandle`] inputs
pub struct PeerCoordinator {
    negotiation_timeout: Duration,
    max_retries: u32,
    candidate_capacity: usize,

    factory: Arc<dyn TransportFactory>,
    signals: Arc<dyn SignalSink>,
    inputs_tx: mpsc::UnboundedSender<Input>,
    state_tx: watch::Sender<PeerState>,

    state: PeerState,
    in_match: bool,
    is_initiator: bool,
    transport: Option<Box<dyn PeerTransport>>,
    generation: Generation,
    remote_description_set: bool,
    pending_candidates: VecDeque<Value>,
    retry_count: u32,
    deadline: Option<Instant>,
    media: Option<Arc<dyn LocalMedia>>,
}

impl PeerCoordinator {
    /// Spawn a coordinator task on the current runtime
    ///
    /// # Arguments
    ///
    /// * `config` - negotiation timeout, retry budget and candidate cap
    /// * `factory` - builds one transport per negotiation attempt
    /// * `signals` - outbound path for offers, answers and candidates
    pub fn spawn(
        config: &PeerConfig,
        factory: Arc<dyn TransportFactory>,
        signals: Arc<dyn SignalSink>,
    ) -> CoordinatorHandle {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(PeerState::Idle);

        let coordinator = PeerCoordinator {
            negotiation_timeout: config.negotiation_timeout(),
            max_retries: config.max_retries,
            candidate_capacity: config.candidate_buffer,
            factory,
            signals,
            inputs_tx: inputs_tx.clone(),
            state_tx,
            state: PeerState::Idle,
            in_match: false,
            is_initiator: false,
            transport: None,
            generation: 0,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            retry_count: 0,
            deadline: None,
            media: None,
        };
        tokio::spawn(coordinator.run(inputs_rx));

        CoordinatorHandle {
            tx: inputs_tx,
            state_rx,
        }
    }

    async fn run(mut self, mut inputs_rx: mpsc::UnboundedReceiver<Input>) {
        debug!("Peer coordinator started");

        loop {
            let deadline = self.deadline;
            let timeout = async move {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                input = inputs_rx.recv() => {
                    match input {
                        Some(Input::Shutdown) | None => break,
                        Some(input) => self.handle_input(input).await,
                    }
                }
                _ = timeout => self.on_timeout().await,
            }
        }

        // Close the input channel before publishing `Closed`
        drop(inputs_rx);
        self.release().await;
        self.set_state(PeerState::Closed);
        debug!("Peer coordinator stopped");
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Matched { is_initiator } => self.on_matched(is_initiator).await,
            Input::Remote { kind, payload } => self.on_remote(kind, payload).await,
            Input::PeerDisconnected => {
                info!("Partner disconnected, releasing peer resources");
                self.cleanup().await;
            }
            Input::Leave => self.cleanup().await,
            Input::AttachMedia(media) => self.on_attach_media(media).await,
            Input::Transport { generation, event } => {
                if generation != self.generation || self.transport.is_none() {
                    debug!(
                        "Ignoring {:?} from stale transport generation {} (current {})",
                        event, generation, self.generation
                    );
                    return;
                }
                self.on_transport_event(event).await;
            }
            // Handled by the run loop
            Input::Shutdown => {}
        }
    }

    async fn on_matched(&mut self, is_initiator: bool) {
        if self.in_match {
            warn!("Matched while a previous match is still active, resetting");
            self.cleanup().await;
        }

        info!("Matched (initiator: {})", is_initiator);
        self.in_match = true;
        self.is_initiator = is_initiator;
        self.retry_count = 0;

        if let Err(e) = self.build_transport().await {
            warn!("Failed to build peer transport: {}", e);
            self.on_failure().await;
            return;
        }

        if is_initiator {
            if let Err(e) = self.send_offer(false).await {
                warn!("Failed to send initial offer: {}", e);
                self.on_failure().await;
                return;
            }
            self.enter_negotiating();
        }
    }

    async fn on_remote(&mut self, kind: SignalKind, payload: Value) {
        if self.state.is_terminal() {
            debug!("Dropping {} in state {:?}", kind.method(), self.state);
            return;
        }

        let result = match kind {
            SignalKind::Offer => self.on_offer(payload).await,
            SignalKind::Answer => self.on_answer(payload).await,
            SignalKind::IceCandidate => {
                self.on_candidate(payload).await;
                Ok(())
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!("Failed to handle {}: {}", kind.method(), e);
                self.on_failure().await;
            }
            // The negotiation deadline still bounds a stalled attempt
            Err(e) => warn!("Discarding unusable {}: {}", kind.method(), e),
        }
    }

    async fn on_offer(&mut self, offer: Value) -> Result<()> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            Error::SignalingError("offer received without an active match".to_string())
        })?;

        let renegotiation = self.state == PeerState::Connected;
        debug!("Applying remote offer (renegotiation: {})", renegotiation);

        transport.set_remote_description(offer).await?;
        self.remote_description_set = true;
        self.flush_candidates().await;

        let answer = match self.transport.as_ref() {
            Some(transport) => transport.create_answer().await?,
            None => return Err(Error::SessionClosed),
        };
        self.signals.send_signal(SignalKind::Answer, answer).await?;

        if !renegotiation && self.state != PeerState::Negotiating {
            self.enter_negotiating();
        }
        Ok(())
    }

    async fn on_answer(&mut self, answer: Value) -> Result<()> {
        let expected = self.is_initiator
            && matches!(self.state, PeerState::Negotiating | PeerState::Connected);
        let Some(transport) = self.transport.as_ref().filter(|_| expected) else {
            warn!("Ignoring unexpected answer in state {:?}", self.state);
            return Ok(());
        };

        transport.set_remote_description(answer).await?;
        self.remote_description_set = true;
        self.flush_candidates().await;
        Ok(())
    }

    async fn on_candidate(&mut self, candidate: Value) {
        if self.remote_description_set {
            if let Some(transport) = self.transport.as_ref() {
                if let Err(e) = transport.add_ice_candidate(candidate).await {
                    warn!("Failed to apply ICE candidate: {}", e);
                }
                return;
            }
        }

        if self.pending_candidates.len() >= self.candidate_capacity {
            self.pending_candidates.pop_front();
            warn!(
                "Candidate buffer full ({}), dropped oldest stale candidate",
                self.candidate_capacity
            );
        }
        self.pending_candidates.push_back(candidate);
        debug!(
            "Buffered early ICE candidate ({} pending)",
            self.pending_candidates.len()
        );
    }

    async fn flush_candidates(&mut self) {
        let Some(transport) = self.transport.as_ref() else {
            return;
        };
        if !self.pending_candidates.is_empty() {
            debug!("Flushing {} buffered candidates", self.pending_candidates.len());
        }
        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = transport.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
    }

    async fn on_attach_media(&mut self, media: Arc<dyn LocalMedia>) {
        if let Some(previous) = self.media.replace(media.clone()) {
            if previous.id() != media.id() {
                previous.stop();
            }
        }
        if let Some(transport) = self.transport.as_ref() {
            if let Err(e) = transport.attach_local_media(media).await {
                warn!("Failed to attach local media: {}", e);
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.state != PeerState::Connected {
                    info!("Peer connection established");
                }
                self.deadline = None;
                self.retry_count = 0;
                self.set_state(PeerState::Connected);
            }
            TransportEvent::Disconnected => {
                if self.state != PeerState::Connected {
                    return;
                }
                if !self.is_initiator {
                    debug!("Transient disconnect, waiting for initiator to restart ICE");
                    return;
                }
                info!("Transient disconnect, restarting ICE");
                if let Err(e) = self.send_offer(true).await {
                    warn!("ICE restart failed: {}", e);
                    self.on_failure().await;
                }
            }
            TransportEvent::Failed => {
                warn!("Peer transport failed");
                self.on_failure().await;
            }
            TransportEvent::LocalCandidate(candidate) => {
                if !self.in_match {
                    return;
                }
                if let Err(e) = self
                    .signals
                    .send_signal(SignalKind::IceCandidate, candidate)
                    .await
                {
                    warn!("Failed to send local ICE candidate: {}", e);
                }
            }
        }
    }

    async fn on_timeout(&mut self) {
        self.deadline = None;
        if self.state == PeerState::Negotiating {
            warn!("{}", Error::ConnectionTimeout(self.negotiation_timeout));
            self.on_failure().await;
        }
    }

    /// Retry with a fresh transport until the budget runs out
    async fn on_failure(&mut self) {
        if !self.in_match {
            return;
        }

        loop {
            if self.retry_count >= self.max_retries {
                error!(
                    "Giving up on peer connection: {}",
                    Error::MaxRetriesExceeded(self.max_retries)
                );
                self.release().await;
                self.set_state(PeerState::Failed);
                return;
            }

            self.retry_count += 1;
            warn!(
                "Retrying peer negotiation (attempt {}/{})",
                self.retry_count, self.max_retries
            );

            match self.restart_negotiation().await {
                Ok(()) => return,
                Err(e) => warn!("Retry attempt {} failed: {}", self.retry_count, e),
            }
        }
    }

    async fn restart_negotiation(&mut self) -> Result<()> {
        self.build_transport().await?;
        if self.is_initiator {
            self.send_offer(false).await?;
        }
        // The responder waits for the fresh offer under a new deadline
        self.enter_negotiating();
        Ok(())
    }

    /// Discard the current transport and build the next generation
    async fn build_transport(&mut self) -> Result<()> {
        self.close_transport().await;

        self.generation += 1;
        let sink = TransportEventSink::new(self.generation, self.inputs_tx.clone());
        let transport = self.factory.build(sink).await?;
        debug!("Built peer transport generation {}", self.generation);

        if let Some(media) = self.media.clone() {
            transport.attach_local_media(media).await?;
        }
        self.transport = Some(transport);
        Ok(())
    }

    async fn close_transport(&mut self) {
        self.remote_description_set = false;
        self.pending_candidates.clear();
        if let Some(transport) = self.transport.take() {
            if let Err(e) = transport.close().await {
                warn!("Error closing peer transport: {}", e);
            }
        }
    }

    async fn send_offer(&self, ice_restart: bool) -> Result<()> {
        let transport = self.transport.as_ref().ok_or(Error::SessionClosed)?;
        let offer = transport.create_offer(ice_restart).await?;
        self.signals.send_signal(SignalKind::Offer, offer).await
    }

    fn enter_negotiating(&mut self) {
        self.deadline = Some(Instant::now() + self.negotiation_timeout);
        self.set_state(PeerState::Negotiating);
    }

    /// Release transport and media, reset to `Idle`; safe to call repeatedly
    async fn cleanup(&mut self) {
        self.release().await;
        self.set_state(PeerState::Idle);
    }

    async fn release(&mut self) {
        self.close_transport().await;
        if let Some(media) = self.media.take() {
            debug!("Stopping local media {}", media.id());
            media.stop();
        }
        self.in_match = false;
        self.is_initiator = false;
        self.retry_count = 0;
        self.deadline = None;
    }

    fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            debug!("Peer state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.state_tx.send_replace(state);
        }
    }
}
