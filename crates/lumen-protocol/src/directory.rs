//! The directory document returned by the handshake.
//!
//! ```json
//! {
//!   "version": 1,
//!   "base_path": "/rt",
//!   "server_token": "9f1c03ab77e0d25e",
//!   "session_id": "3a0f9c21d4b7e610",
//!   "protocols": [
//!     { "protocol": "poll01", "key": "c29bb1b250b6d522" },
//!     { "protocol": "lpll01", "key": "e14abc88cb6c5dcb" }
//!   ],
//!   "preferred": "lpll01"
//! }
//! ```

use serde::{Deserialize, Serialize};

/// One advertised transport: its protocol name and the routing key a
/// client uses to reach it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// Protocol name, e.g. `lpll01`.
    pub protocol: String,
    /// Opaque routing key for the discriminator parameter.
    pub key: String,
}

/// The handshake payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryResponse {
    /// Protocol version the server speaks.
    pub version: u32,
    /// Operator-configured base path.
    pub base_path: String,
    /// Per-instance identity token. A client that sees this change must
    /// re-handshake instead of reusing its session id.
    pub server_token: String,
    /// The session minted for this handshake, as lowercase hex.
    pub session_id: String,
    /// Every enabled transport, in canonical order.
    pub protocols: Vec<DirectoryEntry>,
    /// The transport the operator would like clients to try first.
    pub preferred: String,
}

impl DirectoryResponse {
    /// Finds the routing key advertised for a protocol name.
    pub fn key_for(&self, protocol: &str) -> Option<&str> {
        self.protocols
            .iter()
            .find(|entry| entry.protocol == protocol)
            .map(|entry| entry.key.as_str())
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;

    fn sample() -> DirectoryResponse {
        DirectoryResponse {
            version: 1,
            base_path: "/rt".into(),
            server_token: "00ff00ff00ff00ff".into(),
            session_id: "0000000000000007".into(),
            protocols: vec![DirectoryEntry {
                protocol: "poll01".into(),
                key: "c29bb1b250b6d522".into(),
            }],
            preferred: "poll01".into(),
        }
    }

    #[test]
    fn test_directory_serializes_with_wire_field_names() {
        let json = serde_json::to_value(sample()).unwrap();

        assert_eq!(json["version"], 1);
        assert_eq!(json["base_path"], "/rt");
        assert_eq!(json["server_token"], "00ff00ff00ff00ff");
        assert_eq!(json["protocols"][0]["protocol"], "poll01");
        assert_eq!(json["protocols"][0]["key"], "c29bb1b250b6d522");
        assert_eq!(json["preferred"], "poll01");
    }

    #[test]
    fn test_key_for_finds_advertised_protocol() {
        let dir = sample();
        assert_eq!(dir.key_for("poll01"), Some("c29bb1b250b6d522"));
        assert_eq!(dir.key_for("webs01"), None);
    }
}
