//! Client side of Tandem: signaling client, peer transport coordinator and
//! the `webrtc` transport
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  UI layer (find / leave / render state)                │
//! │  ↓                                                     │
//! │  MatchSession                                          │
//! │  ├─ SignalingClient (WebSocket, JSON-RPC 2.0)          │
//! │  │   ├─ sender: requests, signals, heartbeat           │
//! │  │   └─ receiver: responses + ServerEvents             │
//! │  ├─ Router: matched / signals / peer-disconnected      │
//! │  └─ PeerCoordinator (one task, one input queue)        │
//! │      └─ PeerTransport (rebuilt per retry generation)   │
//! │          └─ WebRtcTransport (RTCPeerConnection)        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use tandem_peer::{FindStatus, MatchSession, PeerConfig, PeerState};
//!
//! # async fn example() -> tandem_peer::Result<()> {
//! let config = PeerConfig::default().with_signaling_url("ws://localhost:3001");
//! let session = MatchSession::connect(&config).await?;
//!
//! if session.find_partner(None).await? == FindStatus::Waiting {
//!     println!("waiting for a partner");
//! }
//! session
//!     .coordinator()
//!     .wait_for_state(PeerState::Connected, Duration::from_secs(60))
//!     .await?;
//!
//! session.leave().await?;
//! session.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lifecycle;
pub mod rtc;
pub mod session;
pub mod transport;

pub use client::{FindStatus, SignalingClient};
pub use config::{PeerConfig, TurnServerConfig};
pub use coordinator::{CoordinatorHandle, PeerCoordinator, PeerState};
pub use error::{Error, Result};
pub use lifecycle::ReconnectionPolicy;
pub use rtc::{WebRtcTransport, WebRtcTransportFactory};
pub use session::MatchSession;
pub use transport::{
    Generation, LocalMedia, PeerTransport, SignalSink, TransportEvent, TransportEventSink,
    TransportFactory,
};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
