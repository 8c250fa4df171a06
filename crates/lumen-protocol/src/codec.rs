//! Codec trait and implementations for the structured (non-packet)
//! documents of the protocol, i.e. the handshake directory.
//!
//! Packets have their own fixed binary framing in [`crate::frame`]; this
//! trait covers the self-describing documents that sit around them. The
//! negotiator only needs *something* that implements [`Codec`], so the
//! JSON choice can be swapped without touching it.

use serde::{Serialize, de::DeserializeOwned};

use crate::ProtocolError;

/// A codec that can encode Rust types to bytes and decode bytes back.
///
/// `Send + Sync + 'static` because one codec instance is shared by every
/// request handler task for the life of the server.
pub trait Codec: Send + Sync + 'static {
    /// MIME type of the encoded form, for the `Content-Type` header.
    fn content_type(&self) -> &'static str;

    /// Serializes a value into bytes.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes bytes back into a value.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` if the bytes are malformed,
    /// incomplete, or don't match the expected type.
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that uses JSON (via `serde_json`).
///
/// Behind the `json` feature flag (enabled by default).
///
/// ## Example
///
/// ```rust
/// use lumen_protocol::{Codec, DirectoryEntry, DirectoryResponse, JsonCodec};
///
/// let dir = DirectoryResponse {
///     version: 1,
///     base_path: String::new(),
///     server_token: "abcd".into(),
///     session_id: "0000000000000001".into(),
///     protocols: vec![DirectoryEntry {
///         protocol: "poll01".into(),
///         key: "c29bb1b250b6d522".into(),
///     }],
///     preferred: "poll01".into(),
/// };
///
/// let bytes = JsonCodec.encode(&dir).unwrap();
/// let back: DirectoryResponse = JsonCodec.decode(&bytes).unwrap();
/// assert_eq!(dir, back);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(value).map_err(ProtocolError::Encode)
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, ProtocolError> {
        serde_json::from_slice(data).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::DirectoryEntry;

    #[test]
    fn test_json_codec_decode_malformed_returns_decode_error() {
        let result: Result<DirectoryEntry, _> = JsonCodec.decode(b"{not json");
        assert!(matches!(result, Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_json_codec_content_type() {
        assert_eq!(JsonCodec.content_type(), "application/json");
    }
}
