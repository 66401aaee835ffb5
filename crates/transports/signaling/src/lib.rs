//! WebSocket signaling server for Tandem matchmaking
//!
//! Exposes the matchmaking core over JSON-RPC 2.0 on a WebSocket per client,
//! plus an HTTP `/health` endpoint.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Browser / native clients                            │
//! │  ↓ WebSocket (JSON-RPC 2.0)                          │
//! │  SignalingServer                                     │
//! │  ├─ accept loop → handle_connection (per endpoint)   │
//! │  │   ├─ reader: parse → dispatch → response          │
//! │  │   └─ writer: registry outbox → notifications      │
//! │  ├─ LifecycleMonitor (deadline sweep)                │
//! │  └─ /health (axum)                                   │
//! │     ↓                                                │
//! │  tandem-core::Registry + SignalingRelay              │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tandem_signaling::{SignalingServer, SignalingServerConfig};
//!
//! # async fn example() -> tandem_signaling::Result<()> {
//! let server = SignalingServer::new(SignalingServerConfig::default())?;
//! let handle = server.start().await?;
//! println!("listening on {}", handle.local_addr());
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod handler;
pub mod health;
pub mod server;

pub use config::{SignalingServerConfig, DEFAULT_MAX_MESSAGE_BYTES};
pub use error::{Error, Result};
pub use server::{SignalingServer, SignalingServerHandle};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
