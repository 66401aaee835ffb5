//! Connection registry
//!
//! Owns every endpoint's state and the waiting pool behind one lock. Each
//! public operation is a single critical section, so concurrent callers
//! observe a linearizable sequence of pairings, departures and evictions.
//! Nothing is awaited while the lock is held; events are pushed into the
//! endpoints' outboxes with `try_send`.

use crate::config::MatchmakingConfig;
use crate::endpoint::{
    EndpointAttributes, EndpointId, EndpointStatus, MatchPreferences, PartnerSummary,
};
use crate::events::{Outbox, ServerEvent, SignalKind};
use crate::matcher::{select_candidate, CandidateView, MatchPolicy};
use crate::pool::WaitingPool;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

/// Result of a find-partner call
#[derive(Debug, Clone, PartialEq)]
pub enum FindOutcome {
    /// No eligible candidate; the caller is in the waiting pool
    Waiting,
    /// Paired with `partner`; both sides have been sent `matched`
    Matched {
        partner: EndpointId,
        is_initiator: bool,
    },
}

/// Counters exposed through `/health` and the `stats` method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub active_endpoints: usize,
    pub waiting_count: usize,
    pub uptime_seconds: u64,
}

struct EndpointEntry {
    outbox: Outbox,
    status: EndpointStatus,
    partner: Option<EndpointId>,
    attributes: EndpointAttributes,
    deadline: Instant,
}

impl EndpointEntry {
    fn notify(&self, id: &EndpointId, event: ServerEvent) -> bool {
        let method = event.method();
        match self.outbox.try_send(event) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping {} for endpoint {}: {}", method, id, e);
                false
            }
        }
    }
}

#[derive(Default)]
struct RegistryState {
    endpoints: HashMap<EndpointId, EndpointEntry>,
    pool: WaitingPool,
}

impl RegistryState {
    /// Break `id`'s partner link on both sides
    ///
    /// The former partner gets exactly one `peer-disconnected`. A one-sided
    /// link is cleared without notifying anybody.
    fn dissolve(&mut self, id: &EndpointId) -> Option<EndpointId> {
        let entry = self.endpoints.get_mut(id)?;
        let partner = entry.partner.take()?;
        entry.status = EndpointStatus::Idle;

        match self.endpoints.get_mut(&partner) {
            Some(other) if other.partner.as_ref() == Some(id) => {
                other.partner = None;
                other.status = EndpointStatus::Idle;
                other.notify(&partner, ServerEvent::PeerDisconnected);
            }
            _ => {
                error!(
                    "Asymmetric partner link while dissolving {} <-> {}",
                    id, partner
                );
            }
        }

        Some(partner)
    }

    /// Pool removal + link dissolution + registry removal
    fn remove(&mut self, id: &EndpointId) -> Option<Option<EndpointId>> {
        if !self.endpoints.contains_key(id) {
            return None;
        }
        self.pool.remove(id);
        let partner = self.dissolve(id);
        self.endpoints.remove(id);
        Some(partner)
    }

    fn entry_mut(&mut self, id: &EndpointId) -> Result<&mut EndpointEntry> {
        self.endpoints
            .get_mut(id)
            .ok_or_else(|| Error::EndpointNotFound(id.clone()))
    }
}

/// Shared registry of connected endpoints and the waiting pool
pub struct Registry {
    state: Mutex<RegistryState>,
    config: MatchmakingConfig,
    policy: MatchPolicy,
    started_at: Instant,
}

impl Registry {
    /// Create an empty registry
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration does not validate.
    pub fn new(config: MatchmakingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(RegistryState::default()),
            policy: MatchPolicy::from(&config),
            config,
            started_at: Instant::now(),
        })
    }

    pub fn config(&self) -> &MatchmakingConfig {
        &self.config
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// Register a newly connected endpoint and greet it with `connection-info`
    ///
    /// # Errors
    ///
    /// Returns `Error::AlreadyRegistered` on an id collision.
    pub fn register(
        &self,
        id: EndpointId,
        attributes: EndpointAttributes,
        outbox: Outbox,
    ) -> Result<()> {
        self.register_from(id, attributes, outbox, None)
    }

    /// Register an endpoint whose transport address is known
    ///
    /// The address is echoed back in `connection-info` and never shown to
    /// partners.
    pub fn register_from(
        &self,
        id: EndpointId,
        attributes: EndpointAttributes,
        outbox: Outbox,
        remote_addr: Option<String>,
    ) -> Result<()> {
        let connected_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();

        let mut state = self.state.lock();
        if state.endpoints.contains_key(&id) {
            return Err(Error::AlreadyRegistered(id));
        }

        let entry = EndpointEntry {
            outbox,
            status: EndpointStatus::Idle,
            partner: None,
            attributes: attributes.clone(),
            deadline: Instant::now() + self.config.heartbeat_timeout(),
        };
        entry.notify(
            &id,
            ServerEvent::ConnectionInfo {
                id: id.clone(),
                attributes,
                connected_at,
                remote_addr,
            },
        );
        state.endpoints.insert(id.clone(), entry);

        info!(
            "Endpoint registered: {} (total: {})",
            id,
            state.endpoints.len()
        );
        Ok(())
    }

    /// Remove an endpoint entirely
    ///
    /// Leaves the pool, dissolves any link (the partner is notified once)
    /// and drops the endpoint. Unknown ids are a no-op returning `false`.
    pub fn unregister(&self, id: &EndpointId) -> bool {
        let mut state = self.state.lock();
        match state.remove(id) {
            Some(partner) => {
                debug!(
                    "Endpoint removed: {} (former partner: {:?}, total: {})",
                    id,
                    partner,
                    state.endpoints.len()
                );
                true
            }
            None => false,
        }
    }

    /// Handle a closed connection
    pub fn disconnect(&self, id: &EndpointId) {
        if self.unregister(id) {
            info!("Endpoint disconnected: {}", id);
        }
    }

    // ========================================================================
    // Activity
    // ========================================================================

    /// Refresh the liveness deadline
    pub fn heartbeat(&self, id: &EndpointId) -> Result<()> {
        self.heartbeat_at(id, Instant::now())
    }

    /// Refresh the liveness deadline as of `now`
    pub fn heartbeat_at(&self, id: &EndpointId, now: Instant) -> Result<()> {
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.deadline = now + self.config.heartbeat_timeout();
        Ok(())
    }

    /// Replace an endpoint's public attributes
    pub fn set_attributes(&self, id: &EndpointId, attributes: EndpointAttributes) -> Result<()> {
        let deadline = Instant::now() + self.config.heartbeat_timeout();
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.attributes = attributes;
        entry.deadline = deadline;
        debug!("Attributes updated for {}", id);
        Ok(())
    }

    /// Set only the display name (legacy `set-username`)
    pub fn set_display_name(&self, id: &EndpointId, name: impl Into<String>) -> Result<()> {
        let deadline = Instant::now() + self.config.heartbeat_timeout();
        let mut state = self.state.lock();
        let entry = state.entry_mut(id)?;
        entry.attributes.display_name = Some(name.into());
        entry.deadline = deadline;
        Ok(())
    }

    // ========================================================================
    // Matchmaking
    // ========================================================================

    /// Pair the caller with the first eligible waiting endpoint, or enqueue it
    ///
    /// # Errors
    ///
    /// - `Error::EndpointNotFound` if the caller is not registered
    /// - `Error::AlreadyMatched` if the caller already has a partner (no
    ///   state change besides the deadline refresh)
    pub fn find_partner(
        &self,
        id: &EndpointId,
        preferences: Option<&MatchPreferences>,
    ) -> Result<FindOutcome> {
        let deadline = Instant::now() + self.config.heartbeat_timeout();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let caller = state.entry_mut(id)?;
        caller.deadline = deadline;
        if caller.partner.is_some() {
            return Err(Error::AlreadyMatched(id.clone()));
        }
        if let Some(prefs) = preferences {
            caller.attributes.apply_preferences(prefs);
        }
        let caller_lobby = caller.attributes.lobby.clone();

        let endpoints = &state.endpoints;
        let candidate = select_candidate(
            &state.pool,
            id,
            caller_lobby.as_deref(),
            self.policy,
            |candidate| {
                endpoints.get(candidate).map(|entry| CandidateView {
                    has_partner: entry.partner.is_some(),
                    lobby: entry.attributes.lobby.as_deref(),
                })
            },
        );

        let Some(candidate) = candidate else {
            state.pool.insert(id.clone());
            state.entry_mut(id)?.status = EndpointStatus::Searching;
            debug!(
                "Endpoint {} waiting for a partner (pool size: {})",
                id,
                state.pool.len()
            );
            return Ok(FindOutcome::Waiting);
        };

        // Commit: both leave the pool and get linked in this critical section
        state.pool.remove(&candidate);
        state.pool.remove(id);

        let caller_is_initiator = self.policy.caller_is_initiator();
        let caller_summary = {
            let caller = state.entry_mut(id)?;
            caller.partner = Some(candidate.clone());
            caller.status = EndpointStatus::Matched;
            PartnerSummary::snapshot(id, &caller.attributes)
        };
        let candidate_summary = {
            let other = state.entry_mut(&candidate)?;
            other.partner = Some(id.clone());
            other.status = EndpointStatus::Matched;
            PartnerSummary::snapshot(&candidate, &other.attributes)
        };

        if let Some(entry) = state.endpoints.get(id) {
            entry.notify(
                id,
                ServerEvent::Matched {
                    is_initiator: caller_is_initiator,
                    partner: candidate_summary,
                },
            );
        }
        if let Some(entry) = state.endpoints.get(&candidate) {
            entry.notify(
                &candidate,
                ServerEvent::Matched {
                    is_initiator: !caller_is_initiator,
                    partner: caller_summary,
                },
            );
        }

        info!(
            "Matched {} with {} (pool size: {})",
            id,
            candidate,
            state.pool.len()
        );

        Ok(FindOutcome::Matched {
            partner: candidate,
            is_initiator: caller_is_initiator,
        })
    }

    /// Stop searching and dissolve any current link
    ///
    /// Returns the former partner, which has been sent one
    /// `peer-disconnected`. The caller may search again right away.
    pub fn leave(&self, id: &EndpointId) -> Result<Option<EndpointId>> {
        let deadline = Instant::now() + self.config.heartbeat_timeout();
        let mut state = self.state.lock();

        let entry = state.entry_mut(id)?;
        entry.deadline = deadline;
        entry.status = EndpointStatus::Idle;
        state.pool.remove(id);

        let partner = state.dissolve(id);
        match &partner {
            Some(partner) => info!("Endpoint {} left chat with {}", id, partner),
            None => debug!("Endpoint {} left (no partner)", id),
        }
        Ok(partner)
    }

    // ========================================================================
    // Relay support
    // ========================================================================

    /// Deliver a signal to the sender's current partner
    ///
    /// The outbox is fed inside the critical section so a pair's `matched`
    /// always precedes its first relayed message.
    pub(crate) fn deliver_to_partner(
        &self,
        from: &EndpointId,
        kind: SignalKind,
        payload: Value,
    ) -> Result<EndpointId> {
        let mut state = self.state.lock();

        let to = state
            .entry_mut(from)?
            .partner
            .clone()
            .ok_or_else(|| Error::NoPartner(from.clone()))?;

        let symmetric = state
            .endpoints
            .get(&to)
            .is_some_and(|entry| entry.partner.as_ref() == Some(from));
        if !symmetric {
            if let Some(entry) = state.endpoints.get_mut(from) {
                entry.partner = None;
                entry.status = EndpointStatus::Idle;
            }
            // The other side may still hold a stale status without a partner
            if let Some(entry) = state.endpoints.get_mut(&to) {
                if entry.partner.is_none() {
                    entry.status = EndpointStatus::Idle;
                }
            }
            error!("Asymmetric partner link {} -> {}; unpaired", from, to);
            return Err(Error::RegistryInconsistency(format!(
                "{} points at {} but not the reverse",
                from, to
            )));
        }

        for side in [from, &to] {
            if let Some(entry) = state.endpoints.get_mut(side) {
                entry.status = EndpointStatus::Chatting;
            }
        }

        let recipient = state.entry_mut(&to)?;
        recipient
            .outbox
            .try_send(ServerEvent::Signal {
                kind,
                payload,
                from: from.clone(),
            })
            .map_err(|_| Error::RecipientUnreachable(to.clone()))?;

        Ok(to)
    }

    // ========================================================================
    // Liveness
    // ========================================================================

    /// Evict every endpoint whose deadline is at or before `now`
    ///
    /// Partners of evicted endpoints receive one `peer-disconnected`.
    pub fn sweep_expired(&self, now: Instant) -> Vec<EndpointId> {
        let mut state = self.state.lock();

        let expired: Vec<EndpointId> = state
            .endpoints
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            if let Some(partner) = state.remove(id) {
                info!(
                    "Evicted inactive endpoint {} (partner notified: {})",
                    id,
                    partner.is_some()
                );
            }
        }

        expired
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            active_endpoints: state.endpoints.len(),
            waiting_count: state.pool.len(),
            uptime_seconds: self.started_at.elapsed().as_secs(),
        }
    }

    pub fn contains(&self, id: &EndpointId) -> bool {
        self.state.lock().endpoints.contains_key(id)
    }

    pub fn status(&self, id: &EndpointId) -> Option<EndpointStatus> {
        self.state.lock().endpoints.get(id).map(|e| e.status)
    }

    pub fn partner_of(&self, id: &EndpointId) -> Option<EndpointId> {
        self.state
            .lock()
            .endpoints
            .get(id)
            .and_then(|e| e.partner.clone())
    }

    pub fn attributes(&self, id: &EndpointId) -> Option<EndpointAttributes> {
        self.state
            .lock()
            .endpoints
            .get(id)
            .map(|e| e.attributes.clone())
    }

    pub fn is_waiting(&self, id: &EndpointId) -> bool {
        self.state.lock().pool.contains(id)
    }

    /// Waiting ids in arrival order
    pub fn waiting(&self) -> Vec<EndpointId> {
        self.state.lock().pool.iter().cloned().collect()
    }

    /// Check the partner and pool invariants over the whole registry
    ///
    /// # Errors
    ///
    /// Returns `Error::RegistryInconsistency` describing the first violation.
    pub fn verify_consistency(&self) -> Result<()> {
        let state = self.state.lock();
        let fail = |msg: String| Err(Error::RegistryInconsistency(msg));

        for id in state.pool.iter() {
            if !state.endpoints.contains_key(id) {
                return fail(format!("{} is waiting but not registered", id));
            }
        }

        for (id, entry) in &state.endpoints {
            let waiting = state.pool.contains(id);
            match &entry.partner {
                Some(partner) => {
                    let back = state
                        .endpoints
                        .get(partner)
                        .and_then(|p| p.partner.as_ref());
                    if back != Some(id) {
                        return fail(format!("{} -> {} is not symmetric", id, partner));
                    }
                    if waiting {
                        return fail(format!("{} is partnered and waiting", id));
                    }
                }
                None => {
                    let searching = entry.status == EndpointStatus::Searching;
                    if waiting != searching {
                        return fail(format!(
                            "{} waiting={} but status={:?}",
                            id, waiting, entry.status
                        ));
                    }
                }
            }
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_one_sided_link(&self, id: &EndpointId, partner: &EndpointId) {
        let mut state = self.state.lock();
        if let Some(entry) = state.endpoints.get_mut(id) {
            entry.partner = Some(partner.clone());
            entry.status = EndpointStatus::Matched;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InitiatorRole;
    use crate::events::{outbox, Inbox};
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> Registry {
        Registry::new(MatchmakingConfig::default()).unwrap()
    }

    fn connect(registry: &Registry, id: &str) -> (EndpointId, Inbox) {
        let id = EndpointId::from(id);
        let (tx, mut rx) = outbox(16);
        registry
            .register(id.clone(), EndpointAttributes::default(), tx)
            .unwrap();
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::ConnectionInfo { .. }
        ));
        (id, rx)
    }

    #[test]
    fn test_register_rejects_duplicate() {
        let registry = registry();
        let (a, _rx) = connect(&registry, "a");
        let (tx, _rx2) = outbox(1);
        let err = registry
            .register(a, EndpointAttributes::default(), tx)
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered(_)));
    }

    #[test]
    fn test_greeting_echoes_remote_address() {
        let registry = registry();
        let (tx, mut rx) = outbox(4);
        registry
            .register_from(
                EndpointId::from("a"),
                EndpointAttributes::default(),
                tx,
                Some("203.0.113.7:50000".to_string()),
            )
            .unwrap();

        match rx.try_recv().unwrap() {
            ServerEvent::ConnectionInfo { id, remote_addr, .. } => {
                assert_eq!(id, EndpointId::from("a"));
                assert_eq!(remote_addr.as_deref(), Some("203.0.113.7:50000"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_first_caller_waits_second_matches() {
        let registry = registry();
        let (a, mut rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");

        assert_eq!(registry.find_partner(&a, None).unwrap(), FindOutcome::Waiting);
        assert_eq!(registry.status(&a), Some(EndpointStatus::Searching));
        assert!(registry.is_waiting(&a));

        let outcome = registry.find_partner(&b, None).unwrap();
        assert_eq!(
            outcome,
            FindOutcome::Matched {
                partner: a.clone(),
                is_initiator: true
            }
        );

        match rx_b.try_recv().unwrap() {
            ServerEvent::Matched {
                is_initiator,
                partner,
            } => {
                assert!(is_initiator);
                assert_eq!(partner.id, a);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx_a.try_recv().unwrap() {
            ServerEvent::Matched {
                is_initiator,
                partner,
            } => {
                assert!(!is_initiator);
                assert_eq!(partner.id, b);
                assert_eq!(partner.display_name, "Anonymous");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());

        assert_eq!(registry.partner_of(&a), Some(b.clone()));
        assert_eq!(registry.partner_of(&b), Some(a.clone()));
        assert!(registry.waiting().is_empty());
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_waiter_role_flips_initiator() {
        let config = MatchmakingConfig::default().with_initiator_role(InitiatorRole::Waiter);
        let registry = Registry::new(config).unwrap();
        let (a, mut rx_a) = connect(&registry, "a");
        let (b, _rx_b) = connect(&registry, "b");

        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();

        assert!(matches!(
            rx_a.try_recv().unwrap(),
            ServerEvent::Matched {
                is_initiator: true,
                ..
            }
        ));
    }

    #[test]
    fn test_find_partner_while_matched_is_rejected() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (b, _rx_b) = connect(&registry, "b");
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();

        let err = registry.find_partner(&a, None).unwrap_err();
        assert!(matches!(err, Error::AlreadyMatched(_)));
        assert_eq!(registry.partner_of(&a), Some(b));
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_repeated_find_keeps_single_pool_entry() {
        let registry = registry();
        let (a, _rx) = connect(&registry, "a");
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&a, None).unwrap();
        assert_eq!(registry.waiting(), vec![a]);
    }

    #[test]
    fn test_preferences_select_lobby() {
        let registry = registry();
        let (gamer, _rx_g) = connect(&registry, "gamer");
        let (musician, _rx_m) = connect(&registry, "musician");
        let (caller, _rx_c) = connect(&registry, "caller");

        registry
            .find_partner(&gamer, Some(&MatchPreferences::in_lobby("gaming")))
            .unwrap();
        registry
            .find_partner(&musician, Some(&MatchPreferences::in_lobby("music")))
            .unwrap();

        let outcome = registry
            .find_partner(&caller, Some(&MatchPreferences::in_lobby("music")))
            .unwrap();
        assert!(matches!(outcome, FindOutcome::Matched { partner, .. } if partner == musician));
        assert_eq!(registry.waiting(), vec![gamer]);
    }

    #[test]
    fn test_leave_notifies_partner_once() {
        let registry = registry();
        let (a, mut rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        assert_eq!(registry.leave(&a).unwrap(), Some(b.clone()));
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::PeerDisconnected);
        assert!(rx_b.try_recv().is_err());
        assert!(rx_a.try_recv().is_err());

        assert!(registry.partner_of(&a).is_none());
        assert!(registry.partner_of(&b).is_none());
        assert_eq!(registry.status(&b), Some(EndpointStatus::Idle));

        // Leaving again is harmless
        assert_eq!(registry.leave(&a).unwrap(), None);
        assert!(rx_b.try_recv().is_err());

        assert_eq!(registry.find_partner(&a, None).unwrap(), FindOutcome::Waiting);
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_leave_while_waiting_clears_pool() {
        let registry = registry();
        let (a, _rx) = connect(&registry, "a");
        registry.find_partner(&a, None).unwrap();
        registry.leave(&a).unwrap();
        assert!(!registry.is_waiting(&a));
        assert_eq!(registry.status(&a), Some(EndpointStatus::Idle));
    }

    #[test]
    fn test_disconnect_waiting_endpoint() {
        let registry = registry();
        let (a, _rx) = connect(&registry, "a");
        registry.find_partner(&a, None).unwrap();
        registry.disconnect(&a);

        assert!(!registry.contains(&a));
        assert!(registry.waiting().is_empty());
        assert!(!registry.unregister(&a));
    }

    #[test]
    fn test_eviction_after_timeout() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();
        rx_b.try_recv().unwrap();

        let start = Instant::now();
        registry
            .heartbeat_at(&b, start + Duration::from_secs(200))
            .unwrap();

        assert!(registry.sweep_expired(start).is_empty());

        let evicted = registry.sweep_expired(start + Duration::from_secs(301));
        assert_eq!(evicted, vec![a.clone()]);
        assert!(!registry.contains(&a));
        assert_eq!(rx_b.try_recv().unwrap(), ServerEvent::PeerDisconnected);
        assert!(rx_b.try_recv().is_err());
        assert!(registry.partner_of(&b).is_none());

        let evicted = registry.sweep_expired(start + Duration::from_secs(501));
        assert_eq!(evicted, vec![b]);
        assert_eq!(registry.stats().active_endpoints, 0);
    }

    #[test]
    fn test_relay_marks_chatting() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();
        rx_b.try_recv().unwrap();

        let to = registry
            .deliver_to_partner(&a, SignalKind::Offer, json!({"sdp": "x"}))
            .unwrap();
        assert_eq!(to, b);
        assert_eq!(registry.status(&a), Some(EndpointStatus::Chatting));
        assert_eq!(registry.status(&b), Some(EndpointStatus::Chatting));
        assert!(matches!(
            rx_b.try_recv().unwrap(),
            ServerEvent::Signal { kind: SignalKind::Offer, .. }
        ));
    }

    #[test]
    fn test_relay_without_partner() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let err = registry
            .deliver_to_partner(&a, SignalKind::Answer, json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::NoPartner(_)));
    }

    #[test]
    fn test_asymmetric_link_is_repaired() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");
        registry.force_one_sided_link(&a, &b);
        assert!(registry.verify_consistency().is_err());

        let err = registry
            .deliver_to_partner(&a, SignalKind::Offer, json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::RegistryInconsistency(_)));
        assert!(rx_b.try_recv().is_err());
        assert!(registry.partner_of(&a).is_none());
        registry.verify_consistency().unwrap();
    }

    #[test]
    fn test_full_outbox_reports_unreachable() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let b = EndpointId::from("b");
        let (tx, _rx_b) = outbox(1);
        // connection-info fills the only slot
        registry
            .register(b.clone(), EndpointAttributes::default(), tx)
            .unwrap();
        registry.find_partner(&b, None).unwrap();
        registry.find_partner(&a, None).unwrap();

        let err = registry
            .deliver_to_partner(&a, SignalKind::Offer, json!({}))
            .unwrap_err();
        assert!(matches!(err, Error::RecipientUnreachable(id) if id == b));
    }

    #[test]
    fn test_stats() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (_b, _rx_b) = connect(&registry, "b");
        registry.find_partner(&a, None).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.active_endpoints, 2);
        assert_eq!(stats.waiting_count, 1);

        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["activeEndpoints"], json!(2));
        assert_eq!(json["waitingCount"], json!(1));
    }

    #[test]
    fn test_set_display_name_feeds_partner_summary() {
        let registry = registry();
        let (a, _rx_a) = connect(&registry, "a");
        let (b, mut rx_b) = connect(&registry, "b");
        registry.set_display_name(&a, "kim").unwrap();
        registry.find_partner(&a, None).unwrap();
        registry.find_partner(&b, None).unwrap();

        match rx_b.try_recv().unwrap() {
            ServerEvent::Matched { partner, .. } => assert_eq!(partner.display_name, "kim"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
