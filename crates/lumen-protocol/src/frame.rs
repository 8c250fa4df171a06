//! Binary frame codec for [`Packet`].
//!
//! Every function here is pure: no shared state, no I/O. Request handlers
//! on any number of threads can call them without coordination.
//!
//! Length travels in the header, never inferred from the carrier, so the
//! same bytes are valid whether a transport delivers one frame per
//! message (WebSocket) or a run of frames glued together (an HTTP body).

use crate::{FramingError, HEADER_LEN, PROTOCOL_VERSION, Packet, PacketType};

/// Encodes a packet into a fresh buffer.
///
/// # Errors
/// [`FramingError::PayloadTooLarge`] if the payload does not fit the
/// 32-bit size field.
pub fn encode(packet: &Packet) -> Result<Vec<u8>, FramingError> {
    let mut out = Vec::with_capacity(packet.encoded_len());
    encode_into(packet, &mut out)?;
    Ok(out)
}

/// Appends the encoded packet to `out`.
///
/// On error nothing is written.
pub fn encode_into(packet: &Packet, out: &mut Vec<u8>) -> Result<(), FramingError> {
    let size = u32::try_from(packet.payload.len())
        .map_err(|_| FramingError::PayloadTooLarge(packet.payload.len()))?;

    out.reserve(packet.encoded_len());
    out.push(packet.version);
    out.push(packet.kind.0);
    out.extend_from_slice(&packet.transport.to_be_bytes());
    out.extend_from_slice(&packet.seq.to_be_bytes());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&packet.payload);
    Ok(())
}

/// Encodes a run of packets as one concatenated body.
pub fn encode_all<'a, I>(packets: I) -> Result<Vec<u8>, FramingError>
where
    I: IntoIterator<Item = &'a Packet>,
{
    let mut out = Vec::new();
    for packet in packets {
        encode_into(packet, &mut out)?;
    }
    Ok(out)
}

/// The fixed header, parsed but not yet checked against the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Header {
    version: u8,
    kind: u8,
    transport: u16,
    seq: u32,
    size: u32,
}

fn read_header(bytes: &[u8]) -> Result<Header, FramingError> {
    // `get` keeps this panic-free on short input.
    let head: &[u8; HEADER_LEN] = bytes
        .get(..HEADER_LEN)
        .and_then(|h| h.try_into().ok())
        .ok_or(FramingError::ShortHeader {
            expected: HEADER_LEN,
            actual: bytes.len(),
        })?;

    let header = Header {
        version: head[0],
        kind: head[1],
        transport: u16::from_be_bytes([head[2], head[3]]),
        seq: u32::from_be_bytes([head[4], head[5], head[6], head[7]]),
        size: u32::from_be_bytes([head[8], head[9], head[10], head[11]]),
    };

    if header.version != PROTOCOL_VERSION {
        return Err(FramingError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            actual: header.version,
        });
    }
    Ok(header)
}

/// Decodes exactly one packet.
///
/// The buffer must hold one header followed by exactly `payload size`
/// bytes: a short buffer is truncation, a long one is corruption.
///
/// # Errors
/// - [`FramingError::ShortHeader`] with fewer than [`HEADER_LEN`] bytes
/// - [`FramingError::VersionMismatch`] on a foreign version
/// - [`FramingError::SizeMismatch`] when the trailing byte count differs
///   from the declared size
pub fn decode(bytes: &[u8]) -> Result<Packet, FramingError> {
    let header = read_header(bytes)?;
    let body = &bytes[HEADER_LEN..];
    if body.len() as u64 != u64::from(header.size) {
        return Err(FramingError::SizeMismatch {
            declared: header.size,
            actual: body.len(),
        });
    }

    Ok(Packet {
        version: header.version,
        kind: PacketType(header.kind),
        transport: header.transport,
        seq: header.seq,
        payload: body.to_vec(),
    })
}

/// Returns the total length of the frame at the start of `bytes`.
///
/// Only the header is inspected, so this works on a buffer that holds a
/// partial payload.
pub fn frame_len(bytes: &[u8]) -> Result<usize, FramingError> {
    let header = read_header(bytes)?;
    usize::try_from(header.size)
        .ok()
        .and_then(|size| size.checked_add(HEADER_LEN))
        .ok_or(FramingError::PayloadTooLarge(usize::MAX))
}

/// Decodes a body made of zero or more concatenated frames.
///
/// Each frame is cut at its declared length and decoded strictly. A
/// trailing partial frame fails the whole body: accepting the complete
/// prefix would hide truncation from the sender.
pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<Packet>, FramingError> {
    let mut packets = Vec::new();
    while !bytes.is_empty() {
        let len = frame_len(bytes)?;
        if bytes.len() < len {
            return Err(FramingError::SizeMismatch {
                declared: (len - HEADER_LEN) as u32,
                actual: bytes.len() - HEADER_LEN,
            });
        }
        let (frame, rest) = bytes.split_at(len);
        packets.push(decode(frame)?);
        bytes = rest;
    }
    Ok(packets)
}
