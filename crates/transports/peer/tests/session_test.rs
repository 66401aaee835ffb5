//! End-to-end session tests
//!
//! Two `MatchSession`s talk through a real signaling server. Transports are
//! in-memory fakes that report `Connected` once a remote description is set.
//!
//! ```bash
//! cargo test -p tandem-peer --test session_test
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tandem_core::ServerEvent;
use tandem_peer::{
    FindStatus, MatchSession, PeerConfig, PeerState, PeerTransport, ReconnectionPolicy,
    SignalingClient, TransportEvent, TransportEventSink, TransportFactory,
};
use tandem_signaling::{SignalingServer, SignalingServerConfig, SignalingServerHandle};

const WAIT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,tandem_peer=debug,tandem_signaling=debug")
        .try_init();
}

/// Loopback transport: connected as soon as both descriptions are known
struct LoopbackTransport {
    events: TransportEventSink,
}

#[async_trait]
impl PeerTransport for LoopbackTransport {
    async fn create_offer(&self, ice_restart: bool) -> tandem_peer::Result<Value> {
        self.events
            .emit(TransportEvent::LocalCandidate(json!({"candidate": "host 1"})));
        Ok(json!({"type": "offer", "sdp": format!("v=0 restart={}", ice_restart)}))
    }

    async fn create_answer(&self) -> tandem_peer::Result<Value> {
        Ok(json!({"type": "answer", "sdp": "v=0"}))
    }

    async fn set_remote_description(&self, _description: Value) -> tandem_peer::Result<()> {
        self.events.emit(TransportEvent::Connected);
        Ok(())
    }

    async fn add_ice_candidate(&self, _candidate: Value) -> tandem_peer::Result<()> {
        Ok(())
    }

    async fn attach_local_media(
        &self,
        _media: Arc<dyn tandem_peer::LocalMedia>,
    ) -> tandem_peer::Result<()> {
        Ok(())
    }

    async fn close(&self) -> tandem_peer::Result<()> {
        Ok(())
    }
}

struct LoopbackFactory;

#[async_trait]
impl TransportFactory for LoopbackFactory {
    async fn build(
        &self,
        events: TransportEventSink,
    ) -> tandem_peer::Result<Box<dyn PeerTransport>> {
        Ok(Box::new(LoopbackTransport { events }))
    }
}

async fn start_server() -> SignalingServerHandle {
    SignalingServer::new(SignalingServerConfig::local())
        .unwrap()
        .start()
        .await
        .unwrap()
}

async fn start_session(handle: &SignalingServerHandle) -> MatchSession {
    let config = PeerConfig::default()
        .with_signaling_url(format!("ws://{}", handle.local_addr()))
        .with_reconnection(ReconnectionPolicy::none());
    MatchSession::start(&config, Arc::new(LoopbackFactory))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_two_sessions_connect_and_leave() {
    init_logging();
    let handle = start_server().await;
    let a = start_session(&handle).await;
    let b = start_session(&handle).await;

    assert_eq!(a.find_partner(None).await.unwrap(), FindStatus::Waiting);

    // Default orientation: the second caller initiates
    let status = b.find_partner(None).await.unwrap();
    assert_eq!(
        status,
        FindStatus::Matched {
            partner: a.endpoint_id().clone(),
            is_initiator: true
        }
    );

    a.coordinator()
        .wait_for_state(PeerState::Connected, WAIT)
        .await
        .unwrap();
    b.coordinator()
        .wait_for_state(PeerState::Connected, WAIT)
        .await
        .unwrap();
    assert_eq!(a.partner().unwrap().id, *b.endpoint_id());
    assert_eq!(b.partner().unwrap().display_name, "Anonymous");

    let former = a.leave().await.unwrap();
    assert_eq!(former.as_ref(), Some(b.endpoint_id()));
    assert!(a.partner().is_none());
    a.coordinator()
        .wait_for_state(PeerState::Idle, WAIT)
        .await
        .unwrap();

    b.coordinator()
        .wait_for_state(PeerState::Idle, WAIT)
        .await
        .unwrap();
    assert!(b.partner().is_none());

    handle.registry().verify_consistency().unwrap();
    a.shutdown().await;
    b.shutdown().await;
    handle.shutdown().await;
}

/// `find-partner` from B races A's `leave-chat` while A waits in the pool
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leave_racing_match_is_cancelled() {
    init_logging();
    let handle = start_server().await;
    let registry = handle.registry();
    let a = start_session(&handle).await;
    let b = start_session(&handle).await;

    for round in 0..30 {
        assert_eq!(a.find_partner(None).await.unwrap(), FindStatus::Waiting);

        let (found, left) = tokio::join!(b.find_partner(None), a.leave());
        found.unwrap();
        left.unwrap();

        registry.verify_consistency().unwrap();
        assert!(registry.partner_of(a.endpoint_id()).is_none(), "round {}", round);
        assert!(a.partner().is_none(), "round {}", round);
        a.coordinator()
            .wait_for_state(PeerState::Idle, WAIT)
            .await
            .unwrap();

        // B either lost its partner or is still searching; reset it
        b.leave().await.unwrap();
        assert!(b.partner().is_none());
        b.coordinator()
            .wait_for_state(PeerState::Idle, WAIT)
            .await
            .unwrap();
        registry.verify_consistency().unwrap();
        assert_eq!(registry.stats().waiting_count, 0);
    }

    a.shutdown().await;
    b.shutdown().await;
    handle.shutdown().await;
}

/// Same race, observed from a bare signaling client on B's side
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_leave_racing_match_notifies_partner_once() {
    init_logging();
    let handle = start_server().await;
    let a = start_session(&handle).await;
    let config = PeerConfig::default()
        .with_signaling_url(format!("ws://{}", handle.local_addr()))
        .with_reconnection(ReconnectionPolicy::none());
    let (b, mut b_events) = SignalingClient::connect(&config).await.unwrap();

    for round in 0..30 {
        assert_eq!(a.find_partner(None).await.unwrap(), FindStatus::Waiting);

        let (found, left) = tokio::join!(b.find_partner(None), a.leave());
        let found = found.unwrap();
        left.unwrap();

        // Notifications precede the leave-chat response on B's socket
        assert_eq!(b.leave_chat().await.unwrap(), None, "round {}", round);

        let mut matched = 0;
        let mut disconnected = 0;
        while let Ok(event) = b_events.try_recv() {
            match event {
                ServerEvent::Matched { .. } => matched += 1,
                ServerEvent::PeerDisconnected => disconnected += 1,
                _ => {}
            }
        }
        let expected = usize::from(matches!(found, FindStatus::Matched { .. }));
        assert_eq!(matched, expected, "round {}", round);
        assert_eq!(disconnected, expected, "round {}", round);

        handle.registry().verify_consistency().unwrap();
        assert!(a.partner().is_none());
        a.coordinator()
            .wait_for_state(PeerState::Idle, WAIT)
            .await
            .unwrap();
    }

    b.close();
    a.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_leave_while_waiting() {
    init_logging();
    let handle = start_server().await;
    let a = start_session(&handle).await;

    assert_eq!(a.find_partner(None).await.unwrap(), FindStatus::Waiting);
    assert_eq!(a.client().stats().await.unwrap().waiting_count, 1);

    assert_eq!(a.leave().await.unwrap(), None);
    let stats = a.client().stats().await.unwrap();
    assert_eq!(stats.waiting_count, 0);
    assert_eq!(stats.active_endpoints, 1);

    a.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_find_partner_twice_is_rejected() {
    init_logging();
    let handle = start_server().await;
    let a = start_session(&handle).await;
    let b = start_session(&handle).await;

    a.find_partner(None).await.unwrap();
    b.find_partner(None).await.unwrap();

    let err = b.find_partner(None).await.unwrap_err();
    match err {
        tandem_peer::Error::Rpc { code, .. } => {
            assert_eq!(code, tandem_core::protocol::error_codes::ALREADY_MATCHED)
        }
        other => panic!("unexpected error: {}", other),
    }

    a.shutdown().await;
    b.shutdown().await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_connect_to_missing_server_fails() {
    init_logging();
    let config = PeerConfig::default()
        .with_signaling_url("ws://127.0.0.1:1")
        .with_reconnection(ReconnectionPolicy::none());
    assert!(MatchSession::start(&config, Arc::new(LoopbackFactory))
        .await
        .is_err());
}
