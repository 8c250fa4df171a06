use lumen_protocol::{FramingError, ProtocolError, TransportKind};
use lumen_session::SessionError;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The session layer refused: unknown session, binding conflict, ...
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The client's bytes could not be framed. The session has been closed.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The client sent a well-framed but invalid packet. The session has
    /// been closed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A packet claimed a different transport than the one it arrived on.
    /// The session has been closed.
    #[error("packet framed for {} arrived on {expected}", tagged(.actual))]
    TransportMismatch {
        /// Transport the packet arrived on.
        expected: TransportKind,
        /// Code carried in the packet header.
        actual: u16,
    },

    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),
}

/// Names the transport a header code refers to, or the raw code if none.
fn tagged(code: &u16) -> String {
    match TransportKind::from_code(*code) {
        Some(kind) => kind.to_string(),
        None => format!("unknown transport code {code}"),
    }
}

impl TransportError {
    /// `true` for errors after which the adapter has closed the session:
    /// byte-level desync and protocol violations.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Framing(_) | Self::Protocol(_) | Self::TransportMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_is_session_fatal() {
        let err: TransportError = FramingError::PayloadTooLarge(1).into();
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_transport_mismatch_names_both_transports() {
        let err = TransportError::TransportMismatch {
            expected: TransportKind::Socket,
            actual: TransportKind::Poll.code(),
        };
        assert_eq!(err.to_string(), "packet framed for poll01 arrived on webs01");
        assert!(err.is_session_fatal());
    }

    #[test]
    fn test_transport_mismatch_with_unknown_code_shows_raw_code() {
        let err = TransportError::TransportMismatch {
            expected: TransportKind::Poll,
            actual: 99,
        };
        assert_eq!(
            err.to_string(),
            "packet framed for unknown transport code 99 arrived on poll01"
        );
    }

    #[test]
    fn test_session_not_found_is_not_fatal() {
        let err: TransportError =
            SessionError::NotFound(lumen_session::SessionId(1)).into();
        assert!(!err.is_session_fatal());
    }
}
