//! The packet: the unit of exchange on every transport.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Version    |    PktType    |           Transport           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Payload Size                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Payload (Payload Size bytes) ...
//! ```
//!
//! All fields are big-endian.

use std::fmt;

use crate::TransportKind;

/// The packet format version this build speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Length of the fixed header: version, type, transport, sequence, size.
pub const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4;

/// The 8-bit packet type discriminator.
///
/// Kept as a raw byte rather than an enum so the codec can decode any
/// value; deciding whether a type is acceptable is the adapter's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketType(pub u8);

impl PacketType {
    /// Server → client: the session is bound and active.
    pub const OPEN_ACK: PacketType = PacketType(1);
    /// Either direction: application payload.
    pub const DATA: PacketType = PacketType(2);
    /// Either direction: liveness check, answered with `PONG`.
    pub const PING: PacketType = PacketType(3);
    /// Either direction: answer to `PING`, echoing its payload.
    pub const PONG: PacketType = PacketType(4);
    /// Client → server: the client is done with the session.
    pub const CLOSE: PacketType = PacketType(5);

    /// Returns `true` for the five types this protocol defines.
    pub fn is_known(self) -> bool {
        (1..=5).contains(&self.0)
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OPEN_ACK => f.write_str("open-ack"),
            Self::DATA => f.write_str("data"),
            Self::PING => f.write_str("ping"),
            Self::PONG => f.write_str("pong"),
            Self::CLOSE => f.write_str("close"),
            Self(other) => write!(f, "unknown({other})"),
        }
    }
}

/// A single framed packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Format version; must equal [`PROTOCOL_VERSION`] to decode.
    pub version: u8,
    /// What the packet means.
    pub kind: PacketType,
    /// Code of the transport this packet was framed for.
    ///
    /// Used to cross-check that a packet arrived on the transport it
    /// claims, never for routing.
    pub transport: u16,
    /// Sender-assigned sequence number (wrapping).
    pub seq: u32,
    /// Opaque application bytes.
    pub payload: Vec<u8>,
}

impl Packet {
    /// Builds a packet at the current protocol version.
    pub fn new(
        kind: PacketType,
        transport: TransportKind,
        seq: u32,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            kind,
            transport: transport.code(),
            seq,
            payload,
        }
    }

    /// Shorthand for a `DATA` packet.
    pub fn data(transport: TransportKind, seq: u32, payload: Vec<u8>) -> Self {
        Self::new(PacketType::DATA, transport, seq, payload)
    }

    /// Number of bytes this packet occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}
