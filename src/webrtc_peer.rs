//! [`TransportEngine`] backed by webrtc-rs.

use crate::config::NegotiatorConfig;
use crate::engine::{PeerEvent, PeerEvents, PeerHandle, TransportEngine};
use crate::error::{CandidateError, EngineError, Result};
use crate::peer::types::{
    Candidate, ConnectionState, Description, MediaKind, MediaSet, RemoteTrack, SdpKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine as RtcMediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Создает конфигурацию для peer connection
pub fn rtc_config(config: &NegotiatorConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: vec![add_ice_url_scheme(server)],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn op_err(err: webrtc::Error) -> EngineError {
    match err {
        webrtc::Error::ErrConnectionClosed => EngineError::Closed,
        other => EngineError::Operation(other.to_string()),
    }
}

pub fn to_rtc_description(desc: Description) -> Result<RTCSessionDescription, EngineError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.body),
        SdpKind::Answer => RTCSessionDescription::answer(desc.body),
    }
    .map_err(|e| EngineError::InvalidState(e.to_string()))
}

pub fn from_rtc_description(desc: RTCSessionDescription) -> Result<Description, EngineError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(Description::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(Description::answer(desc.sdp)),
        other => Err(EngineError::InvalidState(format!(
            "unsupported description type {other}"
        ))),
    }
}

pub fn connection_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Ошибки `add_ice_candidate`: без remote description или после закрытия
/// кандидат уже не применить, остальное можно повторить
pub fn classify_candidate_error(err: webrtc::Error) -> CandidateError {
    match err {
        webrtc::Error::ErrNoRemoteDescription | webrtc::Error::ErrConnectionClosed => {
            CandidateError::Permanent(err.to_string())
        }
        other => CandidateError::Transient(other.to_string()),
    }
}

fn candidate_from_rtc(cand: &RTCIceCandidate) -> Option<Candidate> {
    match cand.to_json() {
        Ok(init) => Some(Candidate {
            payload: init.candidate,
            media_line_index: init.sdp_mline_index,
            media_id: init.sdp_mid,
        }),
        Err(e) => {
            warn!(error = %e, "cannot serialize local candidate");
            None
        }
    }
}

fn codec_for(kind: MediaKind) -> RTCRtpCodecCapability {
    let mime_type = match kind {
        MediaKind::Audio => MIME_TYPE_OPUS,
        MediaKind::Video => MIME_TYPE_VP8,
    };
    RTCRtpCodecCapability {
        mime_type: mime_type.to_owned(),
        ..Default::default()
    }
}

/// Engine на webrtc-rs; один `API` на все peer'ы
pub struct WebRtcEngine {
    config: NegotiatorConfig,
    api: API,
    /// sample-треки последнего handle, по id локального трека
    local_tracks: Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>,
}

impl WebRtcEngine {
    /// Конфиг проверяется здесь же: невалидный ICE сервер не доходит до webrtc-rs
    pub fn new(config: NegotiatorConfig) -> Result<Self> {
        config.validate()?;
        let mut media_engine = RtcMediaEngine::default();
        media_engine.register_default_codecs().map_err(op_err)?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(op_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self {
            config,
            api,
            local_tracks: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Трек, в который хост пишет закодированные сэмплы локального захвата
    pub fn local_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks.lock().get(id).cloned()
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn create_handle(&self, events: PeerEvents) -> Result<Arc<dyn PeerHandle>, EngineError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(rtc_config(&self.config))
                .await
                .map_err(op_err)?,
        );

        let tx = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand.as_ref().and_then(candidate_from_rtc) {
                Some(c) => {
                    let _ = tx.send(PeerEvent::CandidateGenerated(c));
                }
                None if cand.is_none() => {
                    debug!("ICE candidate gathering completed (null candidate received)");
                }
                None => {}
            }
            Box::pin(async {})
        }));

        let tx = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            debug!("Peer connection state changed to: {:?}", st);
            if let Some(state) = connection_state(st) {
                let _ = tx.send(PeerEvent::ConnectionStateChanged(state));
            }
            Box::pin(async {})
        }));

        let tx = events;
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(MediaKind::Audio),
                RTPCodecType::Video => Some(MediaKind::Video),
                _ => None,
            };
            if let Some(kind) = kind {
                let _ = tx.send(PeerEvent::RemoteTrack(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                }));
            }
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            local_tracks: self.local_tracks.clone(),
        }))
    }
}

pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Arc<Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>>,
}

#[async_trait]
impl PeerHandle for WebRtcPeer {
    async fn create_offer(&self) -> Result<Description, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(op_err)?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<Description, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(op_err)?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: Description) -> Result<(), EngineError> {
        self.pc
            .set_local_description(to_rtc_description(desc)?)
            .await
            .map_err(op_err)
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), EngineError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await
            .map_err(op_err)
    }

    async fn local_description(&self) -> Option<Description> {
        let desc = self.pc.local_description().await?;
        from_rtc_description(desc).ok()
    }

    async fn remote_description(&self) -> Option<Description> {
        let desc = self.pc.remote_description().await?;
        from_rtc_description(desc).ok()
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<(), CandidateError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.payload,
            sdp_mid: candidate.media_id,
            sdp_mline_index: candidate.media_line_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(classify_candidate_error)
    }

    async fn attach_local_tracks(&self, media: &MediaSet) -> Result<(), EngineError> {
        let mut attached = HashMap::new();
        for track in &media.tracks {
            let sample = Arc::new(TrackLocalStaticSample::new(
                codec_for(track.kind()),
                track.id().to_owned(),
                media.stream_id.clone(),
            ));
            self.pc
                .add_track(Arc::clone(&sample) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(op_err)?;
            attached.insert(track.id().to_owned(), sample);
        }
        *self.local_tracks.lock() = attached;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "failed to close peer connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::error::{ConfigError, Error};
    use crate::peer::types::{BasicTrack, LocalTrack};
    use tokio::sync::mpsc;

    #[test]
    fn rtc_config_uses_configured_servers() {
        let mut config = NegotiatorConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.com:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        });
        let rtc = rtc_config(&config);
        assert_eq!(rtc.ice_servers.len(), 3);
        assert_eq!(rtc.ice_servers[2].urls, vec!["turn:relay.example.com:3478"]);
        assert_eq!(rtc.ice_servers[2].username, "user");
        assert_eq!(rtc.ice_candidate_pool_size, 10);
    }

    #[test]
    fn engine_rejects_invalid_config() {
        let mut config = NegotiatorConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example.com:3478".into(),
            username: None,
            credential: None,
        });
        assert!(matches!(
            WebRtcEngine::new(config),
            Err(Error::Config(ConfigError::TurnCredentials(id))) if id == "relay"
        ));

        let mut config = NegotiatorConfig::default();
        config.ice_servers[0].url.clear();
        assert!(matches!(
            WebRtcEngine::new(config),
            Err(Error::Config(ConfigError::EmptyUrl))
        ));
    }

    #[test]
    fn candidate_errors_are_classified() {
        assert!(classify_candidate_error(webrtc::Error::ErrNoRemoteDescription).is_permanent());
        assert!(classify_candidate_error(webrtc::Error::ErrConnectionClosed).is_permanent());
        assert!(!classify_candidate_error(webrtc::Error::new("socket busy".into())).is_permanent());
    }

    #[test]
    fn states_map_one_to_one() {
        assert_eq!(
            connection_state(RTCPeerConnectionState::Connected),
            Some(ConnectionState::Connected)
        );
        assert_eq!(connection_state(RTCPeerConnectionState::Unspecified), None);
    }

    #[tokio::test]
    async fn offer_contains_attached_audio() {
        let engine = WebRtcEngine::new(NegotiatorConfig {
            ice_servers: Vec::new(),
            ..Default::default()
        })
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer = engine.create_handle(tx).await.unwrap();

        let media = MediaSet {
            stream_id: "local".into(),
            tracks: vec![BasicTrack::new("mic", MediaKind::Audio) as Arc<dyn LocalTrack>],
            gain: None,
        };
        peer.attach_local_tracks(&media).await.unwrap();
        assert!(engine.local_track("mic").is_some());

        let offer = peer.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.body.contains("m=audio"));

        peer.set_local_description(offer).await.unwrap();
        assert!(peer.local_description().await.is_some());
        assert!(peer.remote_description().await.is_none());
        peer.close().await;
    }
}
