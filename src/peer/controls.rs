use crate::peer::negotiator::SessionNegotiator;
use crate::peer::types::MediaKind;
use crate::utils::clamp_volume;
use tracing::{debug, warn};

impl SessionNegotiator {
    /// Вкл/выкл локального видео. Без локального медиа возвращает `false`.
    pub fn toggle_local_video(&self) -> bool {
        self.toggle(MediaKind::Video)
    }

    /// Вкл/выкл микрофона. Без локального медиа возвращает `false`.
    pub fn toggle_local_audio(&self) -> bool {
        self.toggle(MediaKind::Audio)
    }

    fn toggle(&self, kind: MediaKind) -> bool {
        let media = self.inner.media.lock().clone();
        let Some(media) = media else {
            return false;
        };
        let enabled = {
            let mut controls = self.inner.controls.lock();
            let flag = match kind {
                MediaKind::Video => &mut controls.video_enabled,
                MediaKind::Audio => &mut controls.audio_enabled,
            };
            *flag = !*flag;
            *flag
        };
        for track in media.tracks_of(kind) {
            track.set_enabled(enabled);
        }
        debug!(?kind, enabled, "local track toggled");
        enabled
    }

    /// Громкость удалённой стороны в [0, 1]; применяет её хост
    pub fn set_remote_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        self.inner.controls.lock().remote_volume = volume;
        self.inner.parts.host.remote_volume_changed(volume);
        volume
    }

    pub fn remote_volume(&self) -> f32 {
        self.inner.controls.lock().remote_volume
    }

    /// Громкость микрофона в [0, 1].
    ///
    /// Если у медиа нет управления усилением (или оно отказало), остаётся
    /// только вкл/выкл аудио-треков: `volume > 0`.
    pub fn set_local_volume(&self, volume: f32) -> f32 {
        let volume = clamp_volume(volume);
        self.inner.controls.lock().local_volume = volume;

        let media = self.inner.media.lock().clone();
        let Some(media) = media else {
            return volume;
        };
        let gain_applied = match &media.gain {
            Some(gain) => match gain.set_gain(volume) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "error setting local volume, falling back to track enable");
                    false
                }
            },
            None => false,
        };
        if !gain_applied {
            let enabled = volume > 0.0;
            for track in media.tracks_of(MediaKind::Audio) {
                track.set_enabled(enabled);
            }
            self.inner.controls.lock().audio_enabled = enabled;
        }
        volume
    }

    pub fn local_volume(&self) -> f32 {
        self.inner.controls.lock().local_volume
    }
}
