//! Signaling relay
//!
//! Forwards opaque handshake payloads from an endpoint to its current
//! partner. Payloads are never parsed; delivery is at-most-once.

use crate::endpoint::EndpointId;
use crate::events::{SignalKind, SignalingMessage};
use crate::registry::Registry;
use crate::{Error, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Stateless forwarder between partnered endpoints
#[derive(Clone)]
pub struct SignalingRelay {
    registry: Arc<Registry>,
}

impl SignalingRelay {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Forward `payload` from `from` to its partner
    ///
    /// Returns the message as delivered.
    ///
    /// # Errors
    ///
    /// - `Error::NoPartner` when the sender is unpaired (message discarded)
    /// - `Error::RecipientUnreachable` when the partner's channel is full or closed
    /// - `Error::RegistryInconsistency` when the link was one-sided; both
    ///   sides have been unpaired
    pub fn forward(
        &self,
        from: &EndpointId,
        kind: SignalKind,
        payload: Value,
    ) -> Result<SignalingMessage> {
        match self
            .registry
            .deliver_to_partner(from, kind, payload.clone())
        {
            Ok(to) => {
                debug!("Relayed {} from {} to {}", kind.method(), from, to);
                Ok(SignalingMessage {
                    kind,
                    payload,
                    from: from.clone(),
                    to,
                })
            }
            Err(e) => {
                match &e {
                    Error::NoPartner(_) => {
                        warn!("Discarding {} from {}: no partner", kind.method(), from)
                    }
                    Error::RecipientUnreachable(to) => warn!(
                        "Dropping {} from {}: recipient {} unreachable",
                        kind.method(),
                        from,
                        to
                    ),
                    Error::RegistryInconsistency(msg) => error!("Relay aborted: {}", msg),
                    _ => debug!("Relay of {} from {} failed: {}", kind.method(), from, e),
                }
                Err(e)
            }
        }
    }
}
