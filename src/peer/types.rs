use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Роль участника: caller делает offer, callee только отвечает
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description: `{type, sdp}` как в браузере
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Description {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(rename = "sdp")]
    pub body: String,
}

impl Description {
    pub fn offer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            body: body.into(),
        }
    }

    pub fn answer(body: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            body: body.into(),
        }
    }
}

/// ICE кандидат
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    #[serde(rename = "candidate")]
    pub payload: String,
    #[serde(rename = "sdpMLineIndex", default)]
    pub media_line_index: Option<u16>,
    #[serde(rename = "sdpMid", default)]
    pub media_id: Option<String>,
}

impl Candidate {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            media_line_index: None,
            media_id: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Удалённый трек, пришедший от engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

/// Локальный трек (камера/микрофон), которым владеет `MediaEngine`
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    fn stop(&self);
}

/// Управление усилением локального аудио, если платформа умеет
pub trait GainControl: Send + Sync {
    fn set_gain(&self, gain: f32) -> Result<(), String>;
}

/// Набор локальных треков из одного захвата
#[derive(Clone, Default)]
pub struct MediaSet {
    pub stream_id: String,
    pub tracks: Vec<Arc<dyn LocalTrack>>,
    pub gain: Option<Arc<dyn GainControl>>,
}

impl fmt::Debug for MediaSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSet")
            .field("stream_id", &self.stream_id)
            .field(
                "tracks",
                &self.tracks.iter().map(|t| t.id().to_owned()).collect::<Vec<_>>(),
            )
            .field("gain", &self.gain.is_some())
            .finish()
    }
}

impl MediaSet {
    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<dyn LocalTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Простой трек с флагами; годится для хостов, которые сами кормят engine сэмплами
#[derive(Debug)]
pub struct BasicTrack {
    id: String,
    kind: MediaKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl BasicTrack {
    pub fn new(id: impl Into<String>, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for BasicTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_uses_browser_field_names() {
        let json = r#"{"candidate":"candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host","sdpMLineIndex":0,"sdpMid":"0"}"#;
        let cand: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(cand.media_line_index, Some(0));
        assert_eq!(cand.media_id.as_deref(), Some("0"));
        assert!(cand.payload.ends_with("typ host"));

        let bare: Candidate = serde_json::from_str(r#"{"candidate":"x"}"#).unwrap();
        assert_eq!(bare, Candidate::new("x"));
    }

    #[test]
    fn description_uses_type_and_sdp() {
        let value = serde_json::to_value(Description::answer("v=0")).unwrap();
        assert_eq!(value, serde_json::json!({"type": "answer", "sdp": "v=0"}));
    }

    #[test]
    fn media_set_filters_and_stops_tracks() {
        let audio = BasicTrack::new("mic", MediaKind::Audio);
        let video = BasicTrack::new("cam", MediaKind::Video);
        let media = MediaSet {
            stream_id: "local".into(),
            tracks: vec![
                audio.clone() as Arc<dyn LocalTrack>,
                video.clone() as Arc<dyn LocalTrack>,
            ],
            gain: None,
        };
        assert_eq!(media.tracks_of(MediaKind::Audio).count(), 1);
        media.stop();
        assert!(audio.is_stopped() && video.is_stopped());
        assert!(!video.is_enabled());
    }
}
