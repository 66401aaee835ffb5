//! `webrtc`-backed [`PeerTransport`]
//!
//! Session descriptions travel as `{"type", "sdp"}` JSON and candidates as
//! `RTCIceCandidateInit` JSON, matching what browsers exchange.

use crate::config::PeerConfig;
use crate::transport::{
    LocalMedia, PeerTransport, TransportEvent, TransportEventSink, TransportFactory,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

/// Builds one [`WebRtcTransport`] per negotiation attempt
pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcTransportFactory {
    /// Create a new factory from the STUN/TURN servers in `config`
    ///
    /// # Errors
    ///
    /// Returns `WebRtcError` if codec or interceptor registration fails.
    pub fn new(config: &PeerConfig) -> Result<Self> {
        // Opus for audio, VP8/VP9/H.264 for video
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine).map_err(|e| {
                Error::WebRtcError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        Ok(Self { api, ice_servers })
    }
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn build(&self, events: TransportEventSink) -> Result<Box<dyn PeerTransport>> {
        let rtc_config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };

        let peer_connection = Arc::new(self.api.new_peer_connection(rtc_config).await.map_err(
            |e| Error::WebRtcError(format!("Failed to create peer connection: {}", e)),
        )?);

        let generation = events.generation();
        info!("Created peer connection (generation {})", generation);

        let state_events = events.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |s: RTCPeerConnectionState| {
                let events = state_events.clone();
                Box::pin(async move {
                    debug!("Peer connection state (generation {}): {}", events.generation(), s);
                    match s {
                        RTCPeerConnectionState::Connected => events.emit(TransportEvent::Connected),
                        RTCPeerConnectionState::Disconnected => {
                            events.emit(TransportEvent::Disconnected)
                        }
                        RTCPeerConnectionState::Failed => events.emit(TransportEvent::Failed),
                        _ => {}
                    }
                })
            },
        ));

        let candidate_events = events;
        peer_connection.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                // `None` marks the end of gathering
                let Some(candidate) = c else {
                    return;
                };
                match candidate
                    .to_json()
                    .map_err(Error::from)
                    .and_then(|init| serde_json::to_value(init).map_err(Error::from))
                {
                    Ok(json) => events.emit(TransportEvent::LocalCandidate(json)),
                    Err(e) => warn!("Failed to encode local ICE candidate: {}", e),
                }
            })
        }));

        Ok(Box::new(WebRtcTransport { peer_connection }))
    }
}

/// One `RTCPeerConnection`
pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
}

impl WebRtcTransport {
    async fn local_description_json(&self) -> Result<Value> {
        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("No local description".to_string()))?;
        Ok(serde_json::to_value(local)?)
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self, ice_restart: bool) -> Result<Value> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self
            .peer_connection
            .create_offer(options)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;

        self.peer_connection
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_description_json().await
    }

    async fn create_answer(&self) -> Result<Value> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        self.local_description_json().await
    }

    async fn set_remote_description(&self, description: Value) -> Result<()> {
        let description: RTCSessionDescription = serde_json::from_value(description).map_err(
            |e| Error::SerializationError(format!("Invalid session description: {}", e)),
        )?;
        debug!("Setting remote {} description", description.sdp_type);

        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: Value) -> Result<()> {
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| Error::IceCandidateError(format!("Invalid candidate: {}", e)))?;

        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn attach_local_media(&self, media: Arc<dyn LocalMedia>) -> Result<()> {
        for track in media.tracks() {
            self.peer_connection
                .add_track(track)
                .await
                .map_err(|e| Error::WebRtcError(format!("Failed to add track: {}", e)))?;
        }
        debug!("Attached local media {}", media.id());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("Failed to close peer connection: {}", e)))
    }
}
