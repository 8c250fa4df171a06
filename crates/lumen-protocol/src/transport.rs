//! The four delivery mechanisms a session can ride on.
//!
//! Each kind has three stable names:
//!
//! - a **protocol name** (`poll01`, ...) advertised in the directory,
//! - a default **routing key**, the opaque value a client puts in the
//!   discriminator parameter to reach that transport,
//! - a 16-bit **code** stamped into every packet header framed for it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One concrete delivery mechanism.
///
/// The declaration order is the canonical advertisement order used by
/// the directory.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// One request per check; returns immediately.
    Poll,
    /// One request held open until a packet is queued or a timeout elapses.
    LongPoll,
    /// One long-lived response the server pushes packets into.
    Stream,
    /// One long-lived bidirectional connection.
    Socket,
}

impl TransportKind {
    /// Every kind, in canonical order.
    pub const ALL: [TransportKind; 4] = [
        TransportKind::Poll,
        TransportKind::LongPoll,
        TransportKind::Stream,
        TransportKind::Socket,
    ];

    /// The protocol name advertised in the directory.
    pub const fn protocol_name(self) -> &'static str {
        match self {
            Self::Poll => "poll01",
            Self::LongPoll => "lpll01",
            Self::Stream => "ress01",
            Self::Socket => "webs01",
        }
    }

    /// The routing key used when the operator does not override it.
    pub const fn default_key(self) -> &'static str {
        match self {
            Self::Poll => "c29bb1b250b6d522",
            Self::LongPoll => "e14abc88cb6c5dcb",
            Self::Stream => "f2ace8d571ac98ae",
            Self::Socket => "ee99a57a33ec9ca2",
        }
    }

    /// The code carried in the `transport` header field.
    pub const fn code(self) -> u16 {
        match self {
            Self::Poll => 1,
            Self::LongPoll => 2,
            Self::Stream => 3,
            Self::Socket => 4,
        }
    }

    /// Looks a kind up by its header code.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Looks a kind up by its protocol name.
    pub fn from_protocol_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.protocol_name() == name)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.protocol_name())
    }
}
