use crate::engine::{PeerEvent, PeerHandle, TransportEngine};
use crate::error::EngineError;
use crate::peer::types::MediaSet;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Handle транспортного engine вместе с задачей, разбирающей его колбэки.
///
/// Принадлежит только `SessionNegotiator`; при замене старый handle
/// сначала освобождается через [`SessionHandle::release`].
pub struct SessionHandle {
    peer: Arc<dyn PeerHandle>,
    epoch: u64,
    session_id: String,
    started_at: DateTime<Utc>,
    pump: JoinHandle<()>,
}

impl SessionHandle {
    pub fn new(
        peer: Arc<dyn PeerHandle>,
        epoch: u64,
        session_id: String,
        started_at: DateTime<Utc>,
        pump: JoinHandle<()>,
    ) -> Self {
        Self {
            peer,
            epoch,
            session_id,
            started_at,
            pump,
        }
    }

    pub fn peer(&self) -> Arc<dyn PeerHandle> {
        self.peer.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Закрывает peer и останавливает разбор колбэков
    pub async fn release(self) {
        let lived_ms = (Utc::now() - self.started_at).num_milliseconds();
        debug!(
            session = %self.session_id,
            epoch = self.epoch,
            lived_ms,
            "releasing session handle"
        );
        self.pump.abort();
        self.peer.close().await;
    }
}

/// Создаёт новый peer в engine и прикрепляет к нему локальные треки
pub async fn open_peer(
    engine: &dyn TransportEngine,
    media: &MediaSet,
) -> Result<(Arc<dyn PeerHandle>, mpsc::UnboundedReceiver<PeerEvent>), EngineError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer = engine.create_handle(tx).await?;
    if let Err(e) = peer.attach_local_tracks(media).await {
        peer.close().await;
        return Err(e);
    }
    debug!(tracks = media.tracks.len(), "local tracks attached");
    Ok((peer, rx))
}
