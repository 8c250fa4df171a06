//! Wire protocol for Lumen.
//!
//! This crate defines what travels between client and server:
//!
//! - **Packets** ([`Packet`], [`PacketType`]) and their fixed 12-byte
//!   binary framing ([`frame`]), shared by every transport.
//! - **Transport kinds** ([`TransportKind`]) with their advertised names,
//!   routing keys, and header codes.
//! - **The directory** ([`DirectoryResponse`]) a client receives from the
//!   handshake, and the [`Codec`] that serializes it.
//!
//! Nothing here knows about sessions or connections.
//!
//! ```text
//! Transport (bytes) → Protocol (Packet) → Session (queue, sequence numbers)
//! ```

mod codec;
mod directory;
mod error;
pub mod frame;
mod packet;
mod transport;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use directory::{DirectoryEntry, DirectoryResponse};
pub use error::{FramingError, ProtocolError};
pub use packet::{HEADER_LEN, PROTOCOL_VERSION, Packet, PacketType};
pub use transport::TransportKind;
