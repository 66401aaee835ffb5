//! Matchmaking and signaling relay core for one-to-one video chat
//!
//! This crate pairs anonymous endpoints and forwards the opaque handshake
//! messages they need to establish a direct peer transport.
//!
//! # Features
//!
//! - **Connection registry**: per-endpoint status, partner link, attributes
//!   and liveness deadline behind a single lock
//! - **Waiting pool**: FIFO membership of endpoints searching for a partner
//! - **Matcher**: first-eligible pairing with optional lobby equality
//! - **Lifecycle monitor**: evicts endpoints that stopped sending heartbeats
//! - **Signaling relay**: at-most-once delivery of offers, answers and ICE
//!   candidates to exactly the current partner
//! - **JSON-RPC 2.0 protocol**: wire types shared by server and client
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  Endpoint handlers (one per connection)                  │
//! │  ↓ ClientEvent                                           │
//! │  Registry  ──────── Mutex<RegistryState> ─────────────┐  │
//! │  ├─ WaitingPool (FIFO)                                │  │
//! │  ├─ Matcher (select_candidate)                        │  │
//! │  └─ Outbox per endpoint (try_send, never blocks)      │  │
//! │  SignalingRelay ──→ Registry::deliver_to_partner      │  │
//! │  LifecycleMonitor ──→ Registry::sweep_expired ────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use tandem_core::{outbox, EndpointAttributes, EndpointId, FindOutcome, MatchmakingConfig, Registry};
//!
//! let registry = Registry::new(MatchmakingConfig::default()).unwrap();
//! let (tx_a, _rx_a) = outbox(16);
//! let (tx_b, _rx_b) = outbox(16);
//! let a = EndpointId::from("a");
//! let b = EndpointId::from("b");
//! registry.register(a.clone(), EndpointAttributes::default(), tx_a).unwrap();
//! registry.register(b.clone(), EndpointAttributes::default(), tx_b).unwrap();
//!
//! assert_eq!(registry.find_partner(&a, None).unwrap(), FindOutcome::Waiting);
//! assert!(matches!(
//!     registry.find_partner(&b, None).unwrap(),
//!     FindOutcome::Matched { .. }
//! ));
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod matcher;
pub mod monitor;
pub mod pool;
pub mod protocol;
pub mod registry;
pub mod relay;

pub use config::{InitiatorRole, MatchmakingConfig, DEFAULT_HEARTBEAT_TIMEOUT_MS};
pub use endpoint::{
    EndpointAttributes, EndpointId, EndpointStatus, MatchPreferences, PartnerSummary,
    ANONYMOUS_DISPLAY_NAME,
};
pub use error::{Error, Result};
pub use events::{outbox, Inbox, Outbox, ServerEvent, SignalKind, SignalingMessage};
pub use monitor::{LifecycleMonitor, MonitorHandle};
pub use pool::WaitingPool;
pub use protocol::{
    ClientEvent, ErrorObject, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerMessage,
};
pub use registry::{FindOutcome, Registry, RegistryStats};
pub use relay::SignalingRelay;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
