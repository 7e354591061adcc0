//! Offer/answer state machine for one room.
//!
//! All operations take `&self` and may interleave at their suspension points
//! (engine calls, media acquisition). Locks are never held across `.await`;
//! instead every result is checked against the handle epoch and the expected
//! slot precondition right before it is written into [`NegotiationState`].

use crate::config::{MediaConstraints, NegotiatorConfig};
use crate::engine::{
    HostEvents, MediaEngine, PeerEvent, PeerHandle, RemoteMediaReason, SignalingChannel,
    TransportEngine,
};
use crate::error::{
    CandidateError, CaptureError, Error, NegotiationError, ProtocolViolation, SetupError,
};
use crate::logger::dump_candidate;
use crate::peer::connection::{open_peer, SessionHandle};
use crate::peer::ice::{self, CandidateBuffer};
use crate::peer::init::InitializationGuard;
use crate::peer::state::{DescriptionSlot, NegotiationPhase, NegotiationState};
use crate::peer::types::{
    Candidate, ConnectionState, Description, MediaKind, MediaSet, Role, SdpKind,
};
use crate::signaling::SignalMessage;
use parking_lot::Mutex;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Внешние участники, с которыми работает negotiator
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn TransportEngine>,
    pub media: Arc<dyn MediaEngine>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub host: Arc<dyn HostEvents>,
}

/// Состояние пользовательских контролов (mute, громкость)
#[derive(Debug, Clone, Copy)]
pub(crate) struct Controls {
    pub video_enabled: bool,
    pub audio_enabled: bool,
    pub remote_volume: f32,
    pub local_volume: f32,
}

impl Default for Controls {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
            remote_volume: 1.0,
            local_volume: 1.0,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: NegotiatorConfig,
    pub(crate) parts: Collaborators,
    pub(crate) state: Mutex<NegotiationState>,
    /// remote description сейчас применяется; повторные offer/answer игнорируются
    applying_remote: AtomicBool,
    handle: Mutex<Option<SessionHandle>>,
    pub(crate) media: Mutex<Option<MediaSet>>,
    candidates: Mutex<CandidateBuffer>,
    init: InitializationGuard<Result<(), SetupError>>,
    pub(crate) controls: Mutex<Controls>,
    last_remote_stream: Mutex<Option<String>>,
    offer_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// Флаг применения remote description; снимается при drop
struct RemoteApply<'a>(&'a AtomicBool);

impl<'a> RemoteApply<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RemoteApply<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Negotiator одной пары участников в комнате.
///
/// Дёшево клонируется; все клоны работают с одной сессией.
#[derive(Clone)]
pub struct SessionNegotiator {
    pub(crate) inner: Arc<Inner>,
}

impl SessionNegotiator {
    pub fn new(
        room_id: impl Into<String>,
        role: Role,
        config: NegotiatorConfig,
        parts: Collaborators,
    ) -> Self {
        let state = NegotiationState::new(room_id, role);
        info!(room = %state.room_id, %role, "session negotiator created");
        Self {
            inner: Arc::new(Inner {
                config,
                parts,
                state: Mutex::new(state),
                applying_remote: AtomicBool::new(false),
                handle: Mutex::new(None),
                media: Mutex::new(None),
                candidates: Mutex::new(CandidateBuffer::new()),
                init: InitializationGuard::new(),
                controls: Mutex::new(Controls::default()),
                last_remote_stream: Mutex::new(None),
                offer_task: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn room_id(&self) -> String {
        self.inner.state.lock().room_id.clone()
    }

    pub fn role(&self) -> Role {
        self.inner.state.lock().role
    }

    /// Переназначение роли хостом; действует до следующей инициализации
    pub fn set_role(&self, role: Role) {
        let mut st = self.inner.state.lock();
        if st.role != role {
            info!(from = %st.role, to = %role, "role reassigned");
            st.role = role;
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.inner.state.lock().phase()
    }

    /// Снимок состояния переговоров
    pub fn state(&self) -> NegotiationState {
        self.inner.state.lock().clone()
    }

    pub fn has_handle(&self) -> bool {
        self.inner.handle.lock().is_some()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.inner.candidates.lock().len()
    }

    pub fn is_initializing(&self) -> bool {
        self.inner.init.is_in_flight()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Захват медиа и создание handle, single-flight.
    ///
    /// `role`, если задан, переназначает роль перед стартом новой попытки.
    /// Caller после успешной настройки сам запланирует offer.
    pub async fn ensure_initialized(&self, role: Option<Role>) -> Result<(), SetupError> {
        self.inner.ensure_initialized(role).await
    }

    pub async fn create_offer(&self) -> Result<(), NegotiationError> {
        self.inner.create_offer().await
    }

    pub async fn handle_offer(&self, offer: Description) -> Result<(), NegotiationError> {
        self.inner.handle_offer(offer).await
    }

    pub async fn handle_answer(&self, answer: Description) -> Result<(), NegotiationError> {
        self.inner.handle_answer(answer).await
    }

    pub async fn handle_candidate(&self, candidate: Candidate) -> Result<(), CandidateError> {
        self.inner.handle_candidate(candidate).await
    }

    /// Разбор входящего сообщения signaling-канала
    pub async fn handle_signal(&self, message: SignalMessage) -> Result<(), Error> {
        let room = self.room_id();
        if message.room_id() != room {
            debug!(
                expected = %room,
                got = %message.room_id(),
                kind = message.message_type(),
                "ignoring message for another room"
            );
            return Ok(());
        }
        match message {
            SignalMessage::Offer { payload, .. } => self.handle_offer(payload).await?,
            SignalMessage::Answer { payload, .. } => self.handle_answer(payload).await?,
            SignalMessage::IceCandidate { payload, .. } => self.handle_candidate(payload).await?,
        }
        Ok(())
    }

    /// Разбор сырого JSON из signaling-канала
    pub async fn handle_raw_signal(&self, raw: &str) -> Result<(), Error> {
        let message = SignalMessage::decode(raw)?;
        self.handle_signal(message).await
    }

    /// Закрывает сессию: треки, handle, буфер. Повторный вызов безопасен.
    pub async fn cleanup(&self) {
        self.inner.cleanup().await
    }
}

impl Inner {
    fn report<E: Display>(&self, err: E) -> E {
        error!(error = %err, "negotiation error");
        self.parts.host.negotiation_error(&err.to_string());
        err
    }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("session is closed");
            return Err(NegotiationError::Closed);
        }
        Ok(())
    }

    fn current_peer(&self) -> Option<(Arc<dyn PeerHandle>, u64)> {
        self.handle
            .lock()
            .as_ref()
            .map(|h| (h.peer(), h.epoch()))
    }

    fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    async fn ensure_initialized(self: &Arc<Self>, role: Option<Role>) -> Result<(), SetupError> {
        let inner = self.clone();
        self.init
            .run(move || async move { inner.initialize(role).await })
            .await
    }

    async fn initialize(self: Arc<Self>, role: Option<Role>) -> Result<(), SetupError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SetupError::Closed);
        }
        let role = {
            let mut st = self.state.lock();
            if let Some(role) = role {
                st.role = role;
            }
            st.role
        };
        info!(%role, "initializing session");

        let outcome: Result<(), SetupError> = async {
            let media = self.local_media().await?;
            self.install_handle(&media).await?;
            Ok(())
        }
        .await;

        match outcome {
            Ok(()) => {
                if role == Role::Caller {
                    info!("I am the CALLER, scheduling offer");
                    self.schedule_offer();
                } else {
                    info!("I am the CALLEE, waiting for offer");
                }
                Ok(())
            }
            Err(e) => Err(self.report(e)),
        }
    }

    /// Локальное медиа: уже захваченное или новое (с одной ослабленной попыткой)
    async fn local_media(&self) -> Result<MediaSet, SetupError> {
        if let Some(media) = self.media.lock().clone() {
            return Ok(media);
        }
        let media_engine = self.parts.media.clone();
        let media = match media_engine
            .acquire_local_media(&self.config.media)
            .await
        {
            Ok(media) => media,
            Err(CaptureError::ConstraintsUnsupported) => {
                warn!("capture constraints unsupported, retrying with relaxed ones");
                media_engine
                    .acquire_local_media(&MediaConstraints::relaxed())
                    .await
                    .map_err(|e| {
                        warn!(error = %e, "relaxed capture failed too");
                        SetupError::ConstraintsUnsupported
                    })?
            }
            Err(e) => return Err(e.into()),
        };

        let controls = *self.controls.lock();
        for track in &media.tracks {
            match track.kind() {
                MediaKind::Audio => track.set_enabled(controls.audio_enabled),
                MediaKind::Video => track.set_enabled(controls.video_enabled),
            }
        }
        debug!(?media, "local media acquired");
        *self.media.lock() = Some(media.clone());
        Ok(media)
    }

    /// Атомарная замена handle: старый освобождается, буфер сбрасывается
    async fn install_handle(self: &Arc<Self>, media: &MediaSet) -> Result<(), SetupError> {
        let old = self.handle.lock().take();
        if let Some(old) = old {
            debug!(old = old.session_id(), "replacing session handle");
            self.candidates.lock().reset();
            old.release().await;
        }
        let (epoch, session_id, started_at) = {
            let mut st = self.state.lock();
            let epoch = st.next_generation();
            (epoch, st.session_id.clone(), st.started_at)
        };

        let (peer, events) = open_peer(self.parts.engine.as_ref(), media).await?;
        if self.epoch() != epoch || self.closed.load(Ordering::SeqCst) {
            debug!(epoch, "handle superseded while opening, closing it");
            peer.close().await;
            return Err(SetupError::Closed);
        }
        let pump = self.spawn_event_pump(epoch, events);
        info!(session = %session_id, epoch, "session handle installed");
        let handle = SessionHandle::new(peer, epoch, session_id, started_at, pump);
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    fn spawn_event_pump(
        self: &Arc<Self>,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<PeerEvent>,
    ) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                inner.on_peer_event(epoch, event).await;
            }
        })
    }

    async fn on_peer_event(&self, epoch: u64, event: PeerEvent) {
        if self.epoch() != epoch {
            debug!(epoch, ?event, "dropping event from superseded handle");
            return;
        }
        match event {
            PeerEvent::CandidateGenerated(candidate) => {
                dump_candidate("LOCAL", &candidate);
                let message = SignalMessage::IceCandidate {
                    room_id: self.state.lock().room_id.clone(),
                    payload: candidate,
                };
                if let Err(e) = self.parts.signaling.send(message).await {
                    warn!(error = %e, "failed to send local candidate");
                }
            }
            PeerEvent::ConnectionStateChanged(state) => {
                info!(?state, "connection state changed");
                self.parts.host.connection_state_changed(state);
            }
            PeerEvent::RemoteTrack(track) => {
                let reason = {
                    let mut last = self.last_remote_stream.lock();
                    if last.as_deref() == Some(track.stream_id.as_str()) {
                        RemoteMediaReason::Updated
                    } else {
                        *last = Some(track.stream_id.clone());
                        RemoteMediaReason::Setup
                    }
                };
                info!(track = %track.id, stream = %track.stream_id, reason = reason.as_str(), "remote track");
                self.parts.host.remote_media_ready(reason, &track);
            }
        }
    }

    fn schedule_offer(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let delay = self.config.offer_delay();
        let epoch = self.epoch();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };
            if inner.epoch() != epoch {
                debug!("scheduled offer is stale, skipping");
                return;
            }
            if let Err(e) = inner.create_offer().await {
                debug!(error = %e, "scheduled offer failed");
            }
        });
        if let Some(previous) = self.offer_task.lock().replace(task) {
            previous.abort();
        }
    }

    async fn create_offer(self: &Arc<Self>) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let Some((peer, epoch)) = self.current_peer() else {
            return Err(self.report(NegotiationError::NoHandle));
        };
        let phase = self.state.lock().phase();
        if phase != NegotiationPhase::Idle || self.applying_remote.load(Ordering::SeqCst) {
            return Err(self.report(NegotiationError::IllegalState {
                operation: "create_offer",
                phase: phase.to_string(),
            }));
        }

        let offer = match peer.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                // handle не может выдать description: сессия дальше не живёт
                let err = self.report(NegotiationError::Fatal(e));
                self.cleanup().await;
                return Err(err);
            }
        };
        if !self.still_in(epoch, NegotiationPhase::Idle) {
            debug!("offer superseded before it was applied");
            return Ok(());
        }
        peer.set_local_description(offer.clone())
            .await
            .map_err(|e| self.report(NegotiationError::engine("set_local_description", e)))?;

        let room_id = {
            let mut st = self.state.lock();
            if st.epoch != epoch || !st.local.is_empty() {
                debug!("local offer superseded after it was applied");
                return Ok(());
            }
            st.local = DescriptionSlot::local(offer.kind);
            st.room_id.clone()
        };
        info!(phase = %NegotiationPhase::Offering, "local offer applied, sending");

        self.parts
            .signaling
            .send(SignalMessage::Offer {
                room_id,
                payload: offer,
            })
            .await
            .map_err(|e| self.report(NegotiationError::from(e)))
    }

    fn still_in(&self, epoch: u64, phase: NegotiationPhase) -> bool {
        let st = self.state.lock();
        st.epoch == epoch && st.phase() == phase && !self.applying_remote.load(Ordering::SeqCst)
    }

    async fn handle_offer(self: &Arc<Self>, offer: Description) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        info!(role = %self.state.lock().role, "offer received");
        if offer.kind != SdpKind::Offer {
            warn!(error = %ProtocolViolation("offer message carries an answer".into()), "ignoring");
            return Ok(());
        }

        let mut initialized = false;
        let (peer, epoch) = loop {
            self.ensure_open()?;
            let (role, local, remote) = {
                let st = self.state.lock();
                (st.role, st.local, st.remote)
            };
            if role == Role::Caller {
                warn!(
                    error = %ProtocolViolation("caller received an offer".into()),
                    "this might be a duplicate offer, ignoring"
                );
                return Ok(());
            }
            if remote.is_offer() || self.applying_remote.load(Ordering::SeqCst) {
                info!("offer already set, ignoring duplicate offer");
                return Ok(());
            }
            if local.is_offer() {
                if !remote.is_empty() {
                    info!("we are the offerer and already have remote description, ignoring incoming offer");
                    return Ok(());
                }
                // glare: принимающая сторона всегда уступает
                info!(phase = %NegotiationPhase::Glare, "offer collision detected, recreating session handle to accept incoming offer");
                self.ensure_initialized(None)
                    .await
                    .map_err(NegotiationError::Setup)?;
                initialized = true;
                continue;
            }
            if !local.is_empty() {
                info!(?local, "local description already set, ignoring offer");
                return Ok(());
            }
            match self.current_peer() {
                Some(current) => break current,
                None if initialized => return Err(self.report(NegotiationError::NoHandle)),
                None => {
                    warn!("no session handle yet, initializing now");
                    self.ensure_initialized(None)
                        .await
                        .map_err(NegotiationError::Setup)?;
                    initialized = true;
                }
            }
        };

        let Some(applying) = RemoteApply::begin(&self.applying_remote) else {
            info!("offer is already being applied, ignoring duplicate offer");
            return Ok(());
        };
        {
            let st = self.state.lock();
            if st.epoch != epoch || !st.local.is_empty() || !st.remote.is_empty() {
                info!("offer already set, ignoring duplicate offer");
                return Ok(());
            }
        }
        let slot = DescriptionSlot::remote(offer.kind);
        if let Err(e) = peer.set_remote_description(offer).await {
            return Err(self.report(NegotiationError::engine("set_remote_description", e)));
        }
        {
            let mut st = self.state.lock();
            if st.epoch != epoch {
                debug!("remote offer applied to a superseded handle, discarding");
                return Ok(());
            }
            st.remote = slot;
        }
        drop(applying);
        info!(phase = %NegotiationPhase::OfferReceived, "remote description (offer) set");
        self.drain_candidates(peer.as_ref()).await;

        let answer = peer
            .create_answer()
            .await
            .map_err(|e| self.report(NegotiationError::engine("create_answer", e)))?;

        {
            let st = self.state.lock();
            if st.epoch != epoch || !st.remote.is_offer() {
                debug!("answer superseded, discarding");
                return Ok(());
            }
            if !st.local.is_empty() {
                warn!(local = ?st.local, "local description already set, skipping set_local_description");
                return Ok(());
            }
        }
        if let Some(existing) = peer.local_description().await {
            warn!(kind = ?existing.kind, "local description already set, skipping set_local_description");
            return Ok(());
        }
        peer.set_local_description(answer.clone())
            .await
            .map_err(|e| self.report(NegotiationError::engine("set_local_description", e)))?;

        let room_id = {
            let mut st = self.state.lock();
            if st.epoch != epoch || !st.local.is_empty() {
                debug!("local answer superseded after it was applied");
                return Ok(());
            }
            st.local = DescriptionSlot::local(answer.kind);
            st.room_id.clone()
        };
        info!(phase = %NegotiationPhase::Stable, "answer created and set, sending");

        self.parts
            .signaling
            .send(SignalMessage::Answer {
                room_id,
                payload: answer,
            })
            .await
            .map_err(|e| self.report(NegotiationError::from(e)))
    }

    async fn handle_answer(self: &Arc<Self>, answer: Description) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if answer.kind != SdpKind::Answer {
            warn!(error = %ProtocolViolation("answer message carries an offer".into()), "ignoring");
            return Ok(());
        }
        let Some((peer, epoch)) = self.current_peer() else {
            warn!("answer received but there is no session handle, ignoring");
            return Ok(());
        };
        let Some(applying) = RemoteApply::begin(&self.applying_remote) else {
            info!("remote description is being applied, ignoring duplicate answer");
            return Ok(());
        };
        {
            let st = self.state.lock();
            if st.remote.is_answer() {
                info!("answer already set, ignoring duplicate answer");
                return Ok(());
            }
            if st.epoch != epoch || !st.local.is_offer() || !st.remote.is_empty() {
                warn!(
                    local = ?st.local,
                    remote = ?st.remote,
                    "answer received but we are not the offerer, ignoring"
                );
                return Ok(());
            }
        }

        let slot = DescriptionSlot::remote(answer.kind);
        if let Err(e) = peer.set_remote_description(answer).await {
            return Err(self.report(NegotiationError::engine("set_remote_description", e)));
        }
        {
            let mut st = self.state.lock();
            if st.epoch != epoch || !st.local.is_offer() {
                debug!("remote answer applied to a superseded negotiation, discarding");
                return Ok(());
            }
            st.remote = slot;
        }
        drop(applying);
        info!(phase = %NegotiationPhase::Stable, "remote answer set");
        self.drain_candidates(peer.as_ref()).await;
        Ok(())
    }

    async fn handle_candidate(&self, candidate: Candidate) -> Result<(), CandidateError> {
        if self.closed.load(Ordering::SeqCst) {
            debug!("session is closed, dropping candidate");
            return Ok(());
        }
        let Some((peer, epoch)) = self.current_peer() else {
            debug!("no session handle, queueing ICE candidate for later");
            self.candidates.lock().enqueue(candidate);
            return Ok(());
        };
        if self.state.lock().remote.is_empty() {
            debug!("ICE candidate queued (remote description not set yet)");
            self.candidates.lock().enqueue(candidate);
            return Ok(());
        }
        let behind_queue = {
            let mut buffer = self.candidates.lock();
            let behind = buffer.is_draining() || !buffer.is_empty();
            if behind {
                buffer.enqueue(candidate.clone());
            }
            behind
        };
        if behind_queue {
            // кандидат встаёт за уже отложенными
            debug!("ICE candidate queued behind buffered ones");
            self.drain_candidates(peer.as_ref()).await;
            return Ok(());
        }

        dump_candidate("REMOTE", &candidate);
        match peer.add_candidate(candidate.clone()).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_permanent() => Err(self.report(e)),
            Err(e) => {
                debug!(error = %e, "candidate failed, re-queueing");
                if self.epoch() == epoch {
                    self.candidates.lock().enqueue(candidate);
                }
                Ok(())
            }
        }
    }

    async fn drain_candidates(&self, peer: &dyn PeerHandle) {
        let report = ice::drain(&self.candidates, peer).await;
        for (candidate, e) in &report.dropped {
            debug!(candidate = %candidate.payload, "buffered candidate dropped");
            self.report(e.clone());
        }
        if report.applied > 0 || !report.retry.is_empty() {
            info!(
                applied = report.applied,
                retry = report.retry.len(),
                "queued ICE candidates processed"
            );
        }
    }

    async fn cleanup(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("cleaning up session");
        // без abort: cleanup бывает вызван из самой задачи offer (Fatal);
        // спящая задача проснётся с устаревшим epoch и выйдет
        drop(self.offer_task.lock().take());
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            handle.release().await;
        }
        if let Some(media) = self.media.lock().take() {
            media.stop();
        }
        self.candidates.lock().reset();
        self.state.lock().next_generation();
        self.parts
            .host
            .connection_state_changed(ConnectionState::Closed);
    }
}
