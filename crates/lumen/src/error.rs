//! Unified error type for Lumen.

use lumen_protocol::ProtocolError;
use lumen_session::SessionError;
use lumen_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// The dispatcher turns every failure into an HTTP status with
/// [`status`](Self::status); embedders using the server directly get
/// this single type instead of importing each sub-crate's error.
#[derive(Debug, thiserror::Error)]
pub enum LumenError {
    /// A transport-level error (framing, binding, connection I/O).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encoding the directory document).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (not found, conflict, randomness).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request's server token belongs to another server instance,
    /// or is missing. The client must re-handshake here.
    #[error("server token mismatch")]
    ServerMismatch,

    /// A required request parameter is missing or malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The socket transport was requested without a WebSocket upgrade.
    #[error("socket transport requires a WebSocket upgrade")]
    UpgradeRequired,

    /// The configuration cannot be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LumenError {
    /// The HTTP status a request failing with this error answers with.
    pub fn status(&self) -> u16 {
        match self {
            Self::Session(e) | Self::Transport(TransportError::Session(e)) => session_status(e),
            Self::Transport(e) if e.is_session_fatal() => 400,
            Self::Transport(_) => 500,
            Self::Protocol(_) => 500,
            Self::ServerMismatch => 421,
            Self::BadRequest(_) => 400,
            Self::UpgradeRequired => 426,
            Self::InvalidConfig(_) => 500,
        }
    }
}

fn session_status(error: &SessionError) -> u16 {
    match error {
        SessionError::NotFound(_) | SessionError::Expired(_) => 410,
        SessionError::BindingConflict { .. } => 409,
        SessionError::QueueFull(_) => 503,
        SessionError::RandomnessUnavailable(_) => 500,
    }
}
