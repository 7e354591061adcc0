pub mod connection;
pub mod controls;
pub mod ice;
pub mod init;
pub mod negotiator;
pub mod state;
pub mod types;

pub use ice::CandidateBuffer;
pub use init::InitializationGuard;
pub use negotiator::{Collaborators, SessionNegotiator};
pub use state::{DescriptionSlot, NegotiationPhase, NegotiationState};
pub use types::{
    BasicTrack, Candidate, ConnectionState, Description, GainControl, LocalTrack, MediaKind,
    MediaSet, RemoteTrack, Role, SdpKind,
};
