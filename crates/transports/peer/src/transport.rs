//! Peer transport abstraction
//!
//! The coordinator drives negotiation through [`PeerTransport`] and learns
//! about connectivity through [`TransportEvent`]s. Every transport instance
//! carries a generation number; events from a discarded generation are
//! ignored by the coordinator.

use crate::coordinator::Input;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tandem_core::SignalKind;
use tokio::sync::mpsc;
use webrtc::track::track_local::TrackLocal;

/// Generation counter of a transport instance
pub type Generation = u64;

/// Connectivity callbacks raised by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established
    Connected,
    /// Transient loss of connectivity
    Disconnected,
    /// Unrecoverable transport failure
    Failed,
    /// A local ICE candidate to trickle to the partner
    LocalCandidate(Value),
}

/// Generation-tagged channel through which a transport reports events
#[derive(Clone)]
pub struct TransportEventSink {
    generation: Generation,
    tx: mpsc::UnboundedSender<Input>,
}

impl TransportEventSink {
    pub(crate) fn new(generation: Generation, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Report an event; silently dropped once the coordinator is gone
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.tx.send(Input::Transport {
            generation: self.generation,
            event,
        });
    }
}

/// Local camera/microphone stream handed over by the media collaborator
pub trait LocalMedia: Send + Sync {
    /// Stream identifier (for logging)
    fn id(&self) -> &str;

    /// Tracks to send to the partner
    fn tracks(&self) -> Vec<Arc<dyn TrackLocal + Send + Sync>>;

    /// Stop capturing; called exactly once when the session releases it
    fn stop(&self);
}

/// One negotiation-capable peer connection
///
/// Descriptions and candidates are opaque JSON values on the wire; only the
/// transport implementation interprets them.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Create an offer and apply it as the local description
    async fn create_offer(&self, ice_restart: bool) -> Result<Value>;

    /// Create an answer to the applied remote offer and apply it locally
    async fn create_answer(&self) -> Result<Value>;

    /// Apply a remote offer or answer
    async fn set_remote_description(&self, description: Value) -> Result<()>;

    /// Apply one remote ICE candidate
    async fn add_ice_candidate(&self, candidate: Value) -> Result<()>;

    /// Send the local stream's tracks
    async fn attach_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Builds a fresh transport for each negotiation attempt
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn build(&self, events: TransportEventSink) -> Result<Box<dyn PeerTransport>>;
}

/// Outbound path for handshake messages
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send_signal(&self, kind: SignalKind, payload: Value) -> Result<()>;
}
