use crate::error::SignalingError;
use crate::peer::types::{Candidate, Description};
use serde::{Deserialize, Serialize};

/// Сообщение signaling-канала. Формат совместим с браузерным клиентом:
/// `{"type": "offer", "roomId": "...", "payload": {...}}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    Offer {
        #[serde(rename = "roomId")]
        room_id: String,
        payload: Description,
    },
    Answer {
        #[serde(rename = "roomId")]
        room_id: String,
        payload: Description,
    },
    IceCandidate {
        #[serde(rename = "roomId")]
        room_id: String,
        payload: Candidate,
    },
}

impl SignalMessage {
    pub fn room_id(&self) -> &str {
        match self {
            SignalMessage::Offer { room_id, .. }
            | SignalMessage::Answer { room_id, .. }
            | SignalMessage::IceCandidate { room_id, .. } => room_id,
        }
    }

    /// message type на проводе
    pub fn message_type(&self) -> &'static str {
        match self {
            SignalMessage::Offer { .. } => "offer",
            SignalMessage::Answer { .. } => "answer",
            SignalMessage::IceCandidate { .. } => "ice_candidate",
        }
    }

    pub fn decode(raw: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }
}
