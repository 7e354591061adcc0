//! Capability interfaces of the external collaborators.
//!
//! The negotiator never talks to a concrete WebRTC stack, capture device or
//! socket directly; everything goes through these traits. `webrtc_peer`
//! provides the webrtc-rs backed [`TransportEngine`].

use crate::error::{CandidateError, CaptureError, EngineError, SignalingError};
use crate::config::MediaConstraints;
use crate::peer::types::{Candidate, ConnectionState, Description, MediaSet, RemoteTrack};
use crate::signaling::SignalMessage;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Callbacks of an engine handle, delivered in order on [`PeerEvents`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    CandidateGenerated(Candidate),
    ConnectionStateChanged(ConnectionState),
    RemoteTrack(RemoteTrack),
}

pub type PeerEvents = mpsc::UnboundedSender<PeerEvent>;

/// One peer connection inside the transport engine.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    async fn create_offer(&self) -> Result<Description, EngineError>;
    async fn create_answer(&self) -> Result<Description, EngineError>;
    async fn set_local_description(&self, desc: Description) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: Description) -> Result<(), EngineError>;
    async fn local_description(&self) -> Option<Description>;
    async fn remote_description(&self) -> Option<Description>;
    async fn add_candidate(&self, candidate: Candidate) -> Result<(), CandidateError>;
    async fn attach_local_tracks(&self, media: &MediaSet) -> Result<(), EngineError>;
    async fn close(&self);
}

#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Создаёт новый handle; все его колбэки уходят в `events`
    async fn create_handle(&self, events: PeerEvents) -> Result<Arc<dyn PeerHandle>, EngineError>;
}

#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn acquire_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaSet, CaptureError>;
}

/// Reliable, ordered, room-scoped message channel.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError>;
}

/// Why the host is told that remote media is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteMediaReason {
    /// первый трек привязан
    Setup,
    /// ещё один трек того же удалённого потока
    Updated,
}

impl RemoteMediaReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteMediaReason::Setup => "setup",
            RemoteMediaReason::Updated => "updated",
        }
    }
}

/// Outbound events observable by the embedding application.
pub trait HostEvents: Send + Sync {
    fn connection_state_changed(&self, state: ConnectionState);
    fn remote_media_ready(&self, reason: RemoteMediaReason, track: &RemoteTrack);
    fn negotiation_error(&self, message: &str);
    fn remote_volume_changed(&self, _volume: f32) {}
}

/// Host events as plain values, for hosts that prefer a channel.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ConnectionState(ConnectionState),
    RemoteMediaReady {
        reason: RemoteMediaReason,
        track: RemoteTrack,
    },
    NegotiationError(String),
    RemoteVolume(f32),
}

impl HostEvents for mpsc::UnboundedSender<HostEvent> {
    fn connection_state_changed(&self, state: ConnectionState) {
        let _ = self.send(HostEvent::ConnectionState(state));
    }

    fn remote_media_ready(&self, reason: RemoteMediaReason, track: &RemoteTrack) {
        let _ = self.send(HostEvent::RemoteMediaReady {
            reason,
            track: track.clone(),
        });
    }

    fn negotiation_error(&self, message: &str) {
        let _ = self.send(HostEvent::NegotiationError(message.to_owned()));
    }

    fn remote_volume_changed(&self, volume: f32) {
        let _ = self.send(HostEvent::RemoteVolume(volume));
    }
}
