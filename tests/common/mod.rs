#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use roomcall::{
    BasicTrack, Candidate, CandidateError, CaptureError, Collaborators, Description, EngineError,
    GainControl, HostEvent, LocalTrack, MediaConstraints, MediaEngine, MediaKind, MediaSet,
    NegotiatorConfig, PeerEvent, PeerEvents, PeerHandle, Role, SdpKind, SessionNegotiator,
    SignalMessage, SignalingChannel, SignalingError, TransportEngine,
};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

pub const ROOM: &str = "room-1";

pub fn init_logging() {
    roomcall::logger::init(&NegotiatorConfig {
        logging: true,
        ..Default::default()
    });
}

/// Peer, который запоминает все вызовы.
///
/// Кандидаты с префиксом `perm` отклоняются навсегда, `flaky` падают один раз.
pub struct FakePeer {
    pub id: String,
    events: PeerEvents,
    fail_offer: bool,
    local: Mutex<Option<Description>>,
    remote: Mutex<Option<Description>>,
    pub remote_sets: AtomicUsize,
    pub applied: Mutex<Vec<String>>,
    flaked: Mutex<HashSet<String>>,
    hold: Option<(String, Arc<Notify>)>,
    pub closed: AtomicBool,
}

impl FakePeer {
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }

    pub fn remote(&self) -> Option<Description> {
        self.remote.lock().clone()
    }

    pub fn local(&self) -> Option<Description> {
        self.local.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for FakePeer {
    async fn create_offer(&self) -> Result<Description, EngineError> {
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if self.fail_offer {
            return Err(EngineError::Operation("no description available".into()));
        }
        Ok(Description::offer(format!("{}-offer", self.id)))
    }

    async fn create_answer(&self) -> Result<Description, EngineError> {
        match self.remote.lock().as_ref() {
            Some(d) if d.kind == SdpKind::Offer => {
                Ok(Description::answer(format!("{}-answer", self.id)))
            }
            _ => Err(EngineError::InvalidState("no remote offer".into())),
        }
    }

    async fn set_local_description(&self, desc: Description) -> Result<(), EngineError> {
        *self.local.lock() = Some(desc);
        Ok(())
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), EngineError> {
        if desc.body.starts_with("broken") {
            return Err(EngineError::Operation("cannot parse description".into()));
        }
        self.remote_sets.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        *self.remote.lock() = Some(desc);
        Ok(())
    }

    async fn local_description(&self) -> Option<Description> {
        self.local.lock().clone()
    }

    async fn remote_description(&self) -> Option<Description> {
        self.remote.lock().clone()
    }

    async fn add_candidate(&self, candidate: Candidate) -> Result<(), CandidateError> {
        if self.remote.lock().is_none() {
            return Err(CandidateError::Permanent("remote description was not set".into()));
        }
        if let Some((payload, gate)) = &self.hold {
            if *payload == candidate.payload {
                gate.notified().await;
            }
        }
        if candidate.payload.starts_with("perm") {
            return Err(CandidateError::Permanent("ufrag mismatch".into()));
        }
        let first_try = self.flaked.lock().insert(candidate.payload.clone());
        if candidate.payload.starts_with("flaky") && first_try {
            return Err(CandidateError::Transient("agent busy".into()));
        }
        self.applied.lock().push(candidate.payload);
        Ok(())
    }

    async fn attach_local_tracks(&self, _media: &MediaSet) -> Result<(), EngineError> {
        Ok(())
    }

    async fn close(&self) {
        // настоящий RTCPeerConnection::close тоже уступает планировщику
        tokio::task::yield_now().await;
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeEngine {
    label: String,
    pub fail_offer: AtomicBool,
    /// новые peer'ы задерживают применение кандидата с этим payload до сигнала
    pub hold_candidate: Mutex<Option<(String, Arc<Notify>)>>,
    pub peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakeEngine {
    pub fn new(label: &str) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_owned(),
            fail_offer: AtomicBool::new(false),
            hold_candidate: Mutex::new(None),
            peers: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peer(&self, index: usize) -> Arc<FakePeer> {
        self.peers.lock()[index].clone()
    }

    pub fn last_peer(&self) -> Arc<FakePeer> {
        self.peers.lock().last().cloned().expect("no peer created")
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn create_handle(&self, events: PeerEvents) -> Result<Arc<dyn PeerHandle>, EngineError> {
        let mut peers = self.peers.lock();
        let peer = Arc::new(FakePeer {
            id: format!("{}{}", self.label, peers.len() + 1),
            events,
            fail_offer: self.fail_offer.load(Ordering::SeqCst),
            local: Mutex::new(None),
            remote: Mutex::new(None),
            remote_sets: AtomicUsize::new(0),
            applied: Mutex::new(Vec::new()),
            flaked: Mutex::new(HashSet::new()),
            hold: self.hold_candidate.lock().clone(),
            closed: AtomicBool::new(false),
        });
        peers.push(peer.clone());
        Ok(peer)
    }
}

#[derive(Default)]
pub struct FakeGain {
    pub fail: AtomicBool,
    pub last: Mutex<Option<f32>>,
}

impl GainControl for FakeGain {
    fn set_gain(&self, gain: f32) -> Result<(), String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err("gain node unavailable".into());
        }
        *self.last.lock() = Some(gain);
        Ok(())
    }
}

/// Захват с заранее заданными ответами; по умолчанию успешный
#[derive(Default)]
pub struct FakeMedia {
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<MediaConstraints>>,
    pub script: Mutex<VecDeque<CaptureError>>,
    pub gate: Mutex<Option<Arc<Notify>>>,
    pub gain: Mutex<Option<Arc<FakeGain>>>,
    pub tracks: Mutex<Vec<Arc<BasicTrack>>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_with(&self, errors: impl IntoIterator<Item = CaptureError>) {
        self.script.lock().extend(errors);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn track(&self, kind: MediaKind) -> Arc<BasicTrack> {
        self.tracks
            .lock()
            .iter()
            .find(|t| t.kind() == kind)
            .cloned()
            .expect("no track of that kind")
    }
}

#[async_trait]
impl MediaEngine for FakeMedia {
    async fn acquire_local_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaSet, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(constraints.clone());
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(err) = self.script.lock().pop_front() {
            return Err(err);
        }
        let audio = BasicTrack::new("mic", MediaKind::Audio);
        let video = BasicTrack::new("cam", MediaKind::Video);
        *self.tracks.lock() = vec![audio.clone(), video.clone()];
        Ok(MediaSet {
            stream_id: "local".into(),
            tracks: vec![audio as Arc<dyn LocalTrack>, video as Arc<dyn LocalTrack>],
            gain: self
                .gain
                .lock()
                .clone()
                .map(|g| g as Arc<dyn GainControl>),
        })
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    pub sent: Mutex<Vec<SignalMessage>>,
    pub fail: AtomicBool,
}

impl FakeSignaling {
    pub fn sent(&self) -> Vec<SignalMessage> {
        self.sent.lock().clone()
    }

    pub fn take(&self) -> Vec<SignalMessage> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn offers(&self) -> Vec<Description> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SignalMessage::Offer { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn answers(&self) -> Vec<Description> {
        self.sent()
            .into_iter()
            .filter_map(|m| match m {
                SignalMessage::Answer { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn send(&self, message: SignalMessage) -> Result<(), SignalingError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignalingError::Send("socket closed".into()));
        }
        self.sent.lock().push(message);
        Ok(())
    }
}

pub struct Harness {
    pub negotiator: SessionNegotiator,
    pub engine: Arc<FakeEngine>,
    pub media: Arc<FakeMedia>,
    pub signaling: Arc<FakeSignaling>,
    pub events: mpsc::UnboundedReceiver<HostEvent>,
}

impl Harness {
    pub fn new(label: &str, role: Role) -> Self {
        Self::with_config(label, role, NegotiatorConfig::default())
    }

    pub fn with_config(label: &str, role: Role, config: NegotiatorConfig) -> Self {
        init_logging();
        let engine = FakeEngine::new(label);
        let media = FakeMedia::new();
        let signaling = Arc::new(FakeSignaling::default());
        let (tx, events) = mpsc::unbounded_channel();
        let negotiator = SessionNegotiator::new(
            ROOM,
            role,
            config,
            Collaborators {
                engine: engine.clone(),
                media: media.clone(),
                signaling: signaling.clone(),
                host: Arc::new(tx),
            },
        );
        Self {
            negotiator,
            engine,
            media,
            signaling,
            events,
        }
    }

    pub fn host_events(&mut self) -> Vec<HostEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn errors(&mut self) -> Vec<String> {
        self.host_events()
            .into_iter()
            .filter_map(|e| match e {
                HostEvent::NegotiationError(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }
}

/// Доставляет все накопленные сообщения `from` в `to`
pub async fn deliver(from: &Harness, to: &Harness) {
    for message in from.signaling.take() {
        to.negotiator
            .handle_signal(message)
            .await
            .expect("signal handling failed");
    }
}

/// Ждём, пока отработают задачи на runtime
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
