//! Offer/answer negotiation for a two-party WebRTC call inside a room.
//!
//! [`SessionNegotiator`] drives one session through capability traits
//! ([`TransportEngine`], [`MediaEngine`], [`SignalingChannel`], [`HostEvents`]).
//! [`WebRtcEngine`] is the webrtc-rs backed transport.

pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod peer;
pub mod signaling;
pub mod utils;
pub mod webrtc_peer;

pub use config::{
    AudioConstraints, MediaConstraints, NegotiatorConfig, ServerConfig, VideoConstraints,
};
pub use engine::{
    HostEvent, HostEvents, MediaEngine, PeerEvent, PeerEvents, PeerHandle, RemoteMediaReason,
    SignalingChannel, TransportEngine,
};
pub use error::{
    CandidateError, CaptureError, ConfigError, EngineError, Error, NegotiationError,
    ProtocolViolation, Result, SetupError, SignalingError,
};
pub use peer::{
    BasicTrack, Candidate, Collaborators, ConnectionState, Description, GainControl, LocalTrack,
    MediaKind, MediaSet, NegotiationPhase, NegotiationState, RemoteTrack, Role, SdpKind,
    SessionNegotiator,
};
pub use signaling::SignalMessage;
pub use webrtc_peer::WebRtcEngine;
