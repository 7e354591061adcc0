use thiserror::Error;

/// Ошибки захвата локальных устройств, как их сообщает `MediaEngine`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("camera or microphone not found")]
    DeviceNotFound,
    #[error("capture device is busy (used by another application)")]
    DeviceBusy,
    #[error("requested capture constraints are not supported")]
    ConstraintsUnsupported,
    #[error("media capture is not supported on this platform")]
    Unsupported,
    #[error("capture failed: {0}")]
    Unknown(String),
}

/// Ошибки, которые возвращает сам transport-engine handle
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("engine operation failed: {0}")]
    Operation(String),
    #[error("handle is closed")]
    Closed,
}

/// Ошибки инициализации сессии (медиа + handle)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("camera/microphone permission denied")]
    PermissionDenied,
    #[error("camera or microphone not found")]
    DeviceNotFound,
    #[error("capture device is busy (used by another application)")]
    DeviceBusy,
    #[error("capture constraints are not supported, even relaxed ones")]
    ConstraintsUnsupported,
    #[error("media capture is not supported")]
    Unsupported,
    #[error("setup failed: {0}")]
    Unknown(String),
    #[error("transport handle setup failed: {0}")]
    Transport(#[from] EngineError),
    #[error("session is closed")]
    Closed,
}

impl From<CaptureError> for SetupError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied => SetupError::PermissionDenied,
            CaptureError::DeviceNotFound => SetupError::DeviceNotFound,
            CaptureError::DeviceBusy => SetupError::DeviceBusy,
            CaptureError::ConstraintsUnsupported => SetupError::ConstraintsUnsupported,
            CaptureError::Unsupported => SetupError::Unsupported,
            CaptureError::Unknown(msg) => SetupError::Unknown(msg),
        }
    }
}

/// Ошибки применения offer/answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NegotiationError {
    #[error("{operation} is not valid in phase {phase}")]
    IllegalState {
        operation: &'static str,
        phase: String,
    },
    #[error("no transport handle")]
    NoHandle,
    #[error("session setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error("engine rejected {operation}: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },
    #[error("transport handle cannot produce a description: {0}")]
    Fatal(EngineError),
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),
    #[error("session is closed")]
    Closed,
}

impl NegotiationError {
    pub(crate) fn engine(operation: &'static str, source: EngineError) -> Self {
        NegotiationError::Engine { operation, source }
    }
}

/// Ошибки применения ICE-кандидата
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CandidateError {
    /// можно повторить при следующем drain
    #[error("transient candidate failure: {0}")]
    Transient(String),
    /// remote description сменился, кандидат больше не валиден
    #[error("candidate permanently invalid: {0}")]
    Permanent(String),
}

impl CandidateError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, CandidateError::Permanent(_))
    }
}

/// Сообщение, противоречащее роли; только логируется
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol violation: {0}")]
pub struct ProtocolViolation(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("malformed signaling message: {0}")]
    Codec(String),
    #[error("signaling send failed: {0}")]
    Send(String),
}

impl From<serde_json::Error> for SignalingError {
    fn from(err: serde_json::Error) -> Self {
        SignalingError::Codec(err.to_string())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ICE server url cannot be empty")]
    EmptyUrl,
    #[error("TURN server {0} requires username and credential")]
    TurnCredentials(String),
}

/// Общая ошибка крейта
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    #[error(transparent)]
    Candidate(#[from] CandidateError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
