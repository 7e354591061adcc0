use crate::config::{NegotiatorConfig, LOGGING_ENABLED};
use crate::peer::types::Candidate;
use tracing::debug;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const DEFAULT_FILTER: &str = "roomcall=debug";

/// Ставит глобальный subscriber с временными метками.
///
/// Логирование включается константой `LOGGING_ENABLED` (debug-сборки) либо
/// флагом `logging` в конфиге. Фильтр берётся из `RUST_LOG`, если он задан.
/// Повторный вызов ничего не делает.
pub fn init(config: &NegotiatorConfig) {
    if !(LOGGING_ENABLED || config.logging) {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new(TIME_FORMAT.to_owned()))
        .with_target(false)
        .try_init();
}

/// Печать ICE-candidate (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &Candidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
        cand.payload, cand.media_id, cand.media_line_index
    );
}
