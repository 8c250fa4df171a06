//! The handshake: advertising transports and minting sessions.

use std::sync::Arc;

use lumen_protocol::{Codec, DirectoryEntry, DirectoryResponse, JsonCodec, PROTOCOL_VERSION};
use lumen_session::{SessionError, SessionStore};
use rand::TryRngCore;
use rand::rngs::OsRng;

use crate::{LumenConfig, LumenError};

/// Builds the directory document and creates one session per handshake.
///
/// Everything except the session id is fixed at construction, so a
/// handshake costs one store insert and one JSON encode.
pub struct DirectoryNegotiator {
    store: Arc<SessionStore>,
    server_token: String,
    base_path: String,
    protocols: Vec<DirectoryEntry>,
    preferred: String,
    codec: JsonCodec,
}

impl DirectoryNegotiator {
    /// Creates the negotiator with a fresh server token from the OS RNG.
    ///
    /// # Errors
    /// [`SessionError::RandomnessUnavailable`] if the OS source fails.
    pub fn new(config: &LumenConfig, store: Arc<SessionStore>) -> Result<Self, LumenError> {
        Ok(Self::with_token(config, store, generate_server_token()?))
    }

    /// Creates the negotiator with a fixed server token.
    pub fn with_token(config: &LumenConfig, store: Arc<SessionStore>, server_token: String) -> Self {
        let protocols = config
            .enabled()
            .into_iter()
            .map(|kind| DirectoryEntry {
                protocol: kind.protocol_name().to_string(),
                key: config.keys.get(kind).to_string(),
            })
            .collect();
        let preferred = config
            .preferred_kind()
            .map(|kind| kind.protocol_name().to_string())
            .unwrap_or_default();

        Self {
            store,
            server_token,
            base_path: config.base_path.clone(),
            protocols,
            preferred,
            codec: JsonCodec,
        }
    }

    /// This instance's identity token.
    pub fn server_token(&self) -> &str {
        &self.server_token
    }

    /// Verifies a request was meant for this instance.
    ///
    /// # Errors
    /// [`LumenError::ServerMismatch`] if the token is missing or differs.
    pub fn check_token(&self, token: Option<&str>) -> Result<(), LumenError> {
        match token {
            Some(token) if token == self.server_token => Ok(()),
            _ => Err(LumenError::ServerMismatch),
        }
    }

    /// Creates a session and describes it.
    pub fn negotiate(&self) -> DirectoryResponse {
        let session = self.store.create();
        DirectoryResponse {
            version: u32::from(PROTOCOL_VERSION),
            base_path: self.base_path.clone(),
            server_token: self.server_token.clone(),
            session_id: session.id.to_string(),
            protocols: self.protocols.clone(),
            preferred: self.preferred.clone(),
        }
    }

    /// Creates a session and returns the encoded directory document with
    /// its content type.
    ///
    /// # Errors
    /// [`LumenError::Protocol`] if encoding fails.
    pub fn handshake(&self) -> Result<(Vec<u8>, &'static str), LumenError> {
        let body = self.codec.encode(&self.negotiate())?;
        Ok((body, self.codec.content_type()))
    }
}

/// 8 bytes from the OS RNG as 16 lowercase hex digits.
fn generate_server_token() -> Result<String, SessionError> {
    let mut bytes = [0u8; 8];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| SessionError::RandomnessUnavailable(e.to_string()))?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}
