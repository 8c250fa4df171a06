//! Server configuration.
//!
//! [`LumenConfig`] is plain data with defaults, chainable setters, and a
//! [`validated`](LumenConfig::validated) pass that repairs inconsistent
//! values with a warning instead of failing. The only hard failure is
//! [`check`](LumenConfig::check): routing keys that collide would make
//! requests ambiguous.

use std::time::Duration;

use lumen_protocol::TransportKind;
use lumen_session::SessionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::LumenError;

// ---------------------------------------------------------------------------
// TransportKeys
// ---------------------------------------------------------------------------

/// The opaque routing key for each transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportKeys {
    /// Key for short polling.
    pub poll: String,
    /// Key for long polling.
    pub long_poll: String,
    /// Key for the server-push stream.
    pub stream: String,
    /// Key for the persistent socket.
    pub socket: String,
}

impl Default for TransportKeys {
    fn default() -> Self {
        Self {
            poll: TransportKind::Poll.default_key().to_string(),
            long_poll: TransportKind::LongPoll.default_key().to_string(),
            stream: TransportKind::Stream.default_key().to_string(),
            socket: TransportKind::Socket.default_key().to_string(),
        }
    }
}

impl TransportKeys {
    /// The key for one transport.
    pub fn get(&self, kind: TransportKind) -> &str {
        match kind {
            TransportKind::Poll => &self.poll,
            TransportKind::LongPoll => &self.long_poll,
            TransportKind::Stream => &self.stream,
            TransportKind::Socket => &self.socket,
        }
    }

    /// The transport a key routes to, if any.
    pub fn kind_of(&self, key: &str) -> Option<TransportKind> {
        TransportKind::ALL.into_iter().find(|kind| self.get(*kind) == key)
    }
}

// ---------------------------------------------------------------------------
// LumenConfig
// ---------------------------------------------------------------------------

/// Everything the server reads from its operator.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use lumen::LumenConfig;
///
/// let config = LumenConfig::default()
///     .with_poll(true)
///     .with_long_poll(true)
///     .preferred("lpll01")
///     .poll_timeout(Duration::from_secs(10));
///
/// assert_eq!(config.enabled().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LumenConfig {
    /// Short polling enabled.
    pub poll: bool,
    /// Long polling enabled.
    pub long_poll: bool,
    /// Server-push streaming enabled.
    pub stream: bool,
    /// Persistent sockets enabled.
    pub socket: bool,

    /// Protocol name clients should try first. Falls back to the first
    /// enabled transport when unset or not enabled.
    pub preferred: Option<String>,

    /// Echoed to clients in the directory.
    pub base_path: String,

    /// Name of the request parameter holding the routing discriminator.
    pub query_key: String,

    /// Discriminator value that selects the handshake.
    pub directory_key: String,

    /// Per-transport discriminator values.
    pub keys: TransportKeys,

    /// Session timeouts and limits.
    pub session: SessionConfig,

    /// How often expired sessions are swept.
    pub sweep_interval: Duration,
}

impl Default for LumenConfig {
    fn default() -> Self {
        Self {
            poll: false,
            long_poll: false,
            stream: false,
            socket: false,
            preferred: None,
            base_path: String::new(),
            query_key: "lumen".to_string(),
            directory_key: "directory".to_string(),
            keys: TransportKeys::default(),
            session: SessionConfig::default(),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

impl LumenConfig {
    /// Shortest sweep interval accepted.
    pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

    /// Enables or disables short polling.
    pub fn with_poll(mut self, enabled: bool) -> Self {
        self.poll = enabled;
        self
    }

    /// Enables or disables long polling.
    pub fn with_long_poll(mut self, enabled: bool) -> Self {
        self.long_poll = enabled;
        self
    }

    /// Enables or disables streaming.
    pub fn with_stream(mut self, enabled: bool) -> Self {
        self.stream = enabled;
        self
    }

    /// Enables or disables sockets.
    pub fn with_socket(mut self, enabled: bool) -> Self {
        self.socket = enabled;
        self
    }

    /// Sets the preferred transport by protocol name.
    pub fn preferred(mut self, protocol: &str) -> Self {
        self.preferred = Some(protocol.to_string());
        self
    }

    /// Sets the base path.
    pub fn base_path(mut self, path: &str) -> Self {
        self.base_path = path.to_string();
        self
    }

    /// Sets the long-poll hold time (also the stream and socket
    /// keepalive interval).
    pub fn poll_timeout(mut self, timeout: Duration) -> Self {
        self.session.poll_timeout = timeout;
        self
    }

    /// Sets the session timeouts and limits.
    pub fn session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Whether a transport is enabled.
    pub fn is_enabled(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Poll => self.poll,
            TransportKind::LongPoll => self.long_poll,
            TransportKind::Stream => self.stream,
            TransportKind::Socket => self.socket,
        }
    }

    /// Enabled transports in canonical order.
    pub fn enabled(&self) -> Vec<TransportKind> {
        TransportKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind))
            .collect()
    }

    /// The transport advertised as preferred.
    ///
    /// The configured one if it is enabled, otherwise the first enabled
    /// transport. `None` only when nothing is enabled.
    pub fn preferred_kind(&self) -> Option<TransportKind> {
        self.preferred
            .as_deref()
            .and_then(TransportKind::from_protocol_name)
            .filter(|kind| self.is_enabled(*kind))
            .or_else(|| self.enabled().first().copied())
    }

    /// Repairs values that cannot be used as given.
    ///
    /// Rules:
    /// - session values go through [`SessionConfig::validated`].
    /// - `sweep_interval` is at least [`MIN_SWEEP_INTERVAL`](Self::MIN_SWEEP_INTERVAL).
    /// - an unknown or disabled `preferred` is dropped (the first enabled
    ///   transport is advertised instead).
    pub fn validated(mut self) -> Self {
        self.session = self.session.validated();
        if self.sweep_interval < Self::MIN_SWEEP_INTERVAL {
            warn!(
                requested = ?self.sweep_interval,
                min = ?Self::MIN_SWEEP_INTERVAL,
                "sweep_interval too short, clamping"
            );
            self.sweep_interval = Self::MIN_SWEEP_INTERVAL;
        }
        if let Some(preferred) = &self.preferred {
            let usable = TransportKind::from_protocol_name(preferred)
                .is_some_and(|kind| self.is_enabled(kind));
            if !usable {
                warn!(
                    preferred = %preferred,
                    fallback = ?self.preferred_kind(),
                    "preferred transport is not enabled, falling back"
                );
                self.preferred = None;
            }
        }
        if self.enabled().is_empty() {
            warn!("no transports enabled, the directory will advertise none");
        }
        self
    }

    /// Rejects configurations whose routing would be ambiguous.
    ///
    /// # Errors
    /// [`LumenError::InvalidConfig`] if the query key is empty, or if two
    /// routing keys (the directory key included) are equal or empty.
    pub fn check(&self) -> Result<(), LumenError> {
        if self.query_key.is_empty() {
            return Err(LumenError::InvalidConfig("query_key is empty".into()));
        }
        let mut seen: Vec<&str> = vec![self.directory_key.as_str()];
        for kind in TransportKind::ALL {
            seen.push(self.keys.get(kind));
        }
        for (i, key) in seen.iter().enumerate() {
            if key.is_empty() {
                return Err(LumenError::InvalidConfig("routing key is empty".into()));
            }
            if seen[..i].contains(key) {
                return Err(LumenError::InvalidConfig(format!(
                    "routing key {key:?} is used twice"
                )));
            }
        }
        Ok(())
    }
}
