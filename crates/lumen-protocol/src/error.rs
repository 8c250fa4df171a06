//! Error types for the protocol layer.
//!
//! Two enums live here. [`FramingError`] covers the byte-level packet
//! format: anything that means the receiver can no longer trust where
//! one frame ends and the next begins. [`ProtocolError`] is the crate's
//! umbrella error and also covers the JSON directory document and
//! semantically invalid (but well-framed) packets.

/// A packet could not be framed or unframed.
///
/// Framing errors are fatal for the session that produced them: once the
/// byte stream is out of step there is no safe way to find the next
/// header again, so adapters close the session instead of skipping ahead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Fewer bytes than a full header were available.
    #[error("truncated header: need {expected} bytes, got {actual}")]
    ShortHeader {
        /// Header length the codec requires.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The header's payload size disagrees with the bytes that follow it.
    #[error("payload size mismatch: header declares {declared} bytes, {actual} present")]
    SizeMismatch {
        /// Size carried in the header.
        declared: u32,
        /// Trailing bytes actually present.
        actual: usize,
    },

    /// The packet was framed for a different protocol version.
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Version this build speaks.
        expected: u8,
        /// Version found in the header.
        actual: u8,
    },

    /// The payload is too large for the 32-bit size field.
    #[error("payload of {0} bytes exceeds the 32-bit size field")]
    PayloadTooLarge(usize),
}

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serializing the directory document failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Parsing the directory document failed.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// A packet could not be framed or unframed.
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The packet is well-framed but violates protocol rules, e.g. a
    /// client sending `OpenAck` or an unknown packet type.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_error_display_names_both_sizes() {
        let err = FramingError::SizeMismatch {
            declared: 5,
            actual: 3,
        };
        let text = err.to_string();
        assert!(text.contains('5'));
        assert!(text.contains('3'));
    }

    #[test]
    fn test_protocol_error_from_framing_error() {
        let err: ProtocolError = FramingError::ShortHeader {
            expected: 12,
            actual: 4,
        }
        .into();
        assert!(matches!(err, ProtocolError::Framing(_)));
    }
}
