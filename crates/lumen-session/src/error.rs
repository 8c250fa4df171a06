//! Error types for the session layer.

use lumen_protocol::TransportKind;

use crate::SessionId;

/// Errors that can occur during session management.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session exists for this id: it never existed, it expired, or
    /// it was closed. This is the ordinary outcome of a client returning
    /// after its session was swept; the client must re-handshake.
    #[error("session {0} not found")]
    NotFound(SessionId),

    /// The session was still handshaking when its establishment window
    /// ran out, so it was discarded on this access.
    #[error("session {0} expired before it was established")]
    Expired(SessionId),

    /// Another transport currently holds delivery rights to the session.
    /// The existing binding is left untouched.
    #[error("session {session} is already bound to {bound}, cannot bind {requested}")]
    BindingConflict {
        /// The contested session.
        session: SessionId,
        /// Transport that holds the binding.
        bound: TransportKind,
        /// Transport that asked for it.
        requested: TransportKind,
    },

    /// The session's outbound queue is at capacity.
    #[error("outbound queue for session {0} is full")]
    QueueFull(SessionId),

    /// The OS random source could not seed the id generator.
    ///
    /// Unguessable ids are a security property, so this aborts startup
    /// rather than falling back to a predictable seed.
    #[error("secure randomness unavailable: {0}")]
    RandomnessUnavailable(String),
}

impl SessionError {
    /// `true` when the client should start over with a new handshake.
    pub fn requires_handshake(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Expired(_))
    }
}
