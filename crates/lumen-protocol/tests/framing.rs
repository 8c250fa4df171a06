//! Integration tests for packet framing as a client would see it:
//! hand-built byte buffers rather than values produced by the encoder.

use lumen_protocol::frame::{decode, decode_all, encode, encode_all};
use lumen_protocol::{FramingError, HEADER_LEN, Packet, PacketType, TransportKind};

#[test]
fn test_hand_built_frame_decodes() {
    // version 1, DATA, socket (4), seq 7, size 2, "ok"
    let bytes = [1u8, 2, 0, 4, 0, 0, 0, 7, 0, 0, 0, 2, b'o', b'k'];

    let packet = decode(&bytes).expect("valid frame");

    assert_eq!(packet.kind, PacketType::DATA);
    assert_eq!(TransportKind::from_code(packet.transport), Some(TransportKind::Socket));
    assert_eq!(packet.seq, 7);
    assert_eq!(packet.payload, b"ok");
}

#[test]
fn test_declared_five_with_three_present_is_framing_error() {
    let bytes = [1u8, 2, 0, 1, 0, 0, 0, 1, 0, 0, 0, 5, b'a', b'b', b'c'];

    let err = decode(&bytes).expect_err("must not return a truncated packet");

    assert_eq!(err, FramingError::SizeMismatch { declared: 5, actual: 3 });
}

#[test]
fn test_roundtrip_preserves_large_payload_and_extreme_fields() {
    let packet = Packet {
        version: lumen_protocol::PROTOCOL_VERSION,
        kind: PacketType::PONG,
        transport: u16::MAX,
        seq: u32::MAX,
        payload: (0..=255u8).cycle().take(70_000).collect(),
    };

    let bytes = encode(&packet).unwrap();

    assert_eq!(bytes.len(), HEADER_LEN + 70_000);
    assert_eq!(decode(&bytes).unwrap(), packet);
}

#[test]
fn test_body_of_frames_survives_arbitrary_rechunking() {
    // A transport that does not preserve message boundaries may hand the
    // receiver the body in any chunking; reassembled, it must decode to
    // the same packets.
    let packets: Vec<Packet> = (0..5u32)
        .map(|i| Packet::data(TransportKind::Stream, i, vec![i as u8; i as usize * 3]))
        .collect();
    let body = encode_all(&packets).unwrap();

    let mut reassembled = Vec::new();
    for chunk in body.chunks(7) {
        reassembled.extend_from_slice(chunk);
    }

    assert_eq!(decode_all(&reassembled).unwrap(), packets);
}
