use thiserror::Error;

/// Top-level error type shared by every crate in the gateway workspace.
///
/// Variants map directly onto the error kinds every component is expected
/// to recognise: transient backend failures are retried by the caller,
/// the rest are terminal for the session or connection that produced them.
#[derive(Error, Debug)]
pub enum GwError {
    #[error("orchestrator backend error: {0}")]
    TransientBackend(String),

    #[error("no capacity for target type: {0}")]
    NoCapacity(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session not ready: {0}")]
    SessionNotReady(String),

    #[error("bridge startup failed for session {session_id}: {reason}")]
    BridgeStartupFailure { session_id: String, reason: String },

    #[error("upstream connection closed")]
    UpstreamClosed,

    #[error("authentication failed: {0}")]
    AuthFailure(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
}

pub type GwResult<T> = Result<T, GwError>;

impl GwError {
    /// WebSocket close code this error maps to, per the gateway's external contract.
    pub fn ws_close_code(&self) -> u16 {
        match self {
            GwError::SessionNotFound(_) | GwError::SessionNotReady(_) => 1008,
            GwError::BridgeStartupFailure { .. } | GwError::AuthFailure(_) => 1011,
            GwError::UpstreamClosed => 1000,
            _ => 1011,
        }
    }
}
