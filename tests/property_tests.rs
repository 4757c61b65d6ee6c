//! Property-based tests using proptest
//!
//! Framing must not depend on how the transport chunks the byte stream,
//! and arbitrary input must never panic the decoder.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use font_agent_protocol::protocol::sanitize::sanitized;
use font_agent_protocol::{
    AuthRequest, AuthResponse, FontInstallRequest, FontInstallResponse, FrameCodec, Packet,
    PacketRegistry, ProtocolError,
};
use proptest::prelude::*;

fn packet_strategy() -> impl Strategy<Value = Packet> {
    prop_oneof![
        (any::<u32>(), "[a-zA-Z0-9]{0,32}", "[a-zA-Z0-9-]{0,64}").prop_map(
            |(version, client_name, client_hwid)| Packet::AuthRequest(AuthRequest {
                version,
                client_name,
                client_hwid,
            })
        ),
        (any::<bool>(), "[a-zA-Z0-9.]{0,256}")
            .prop_map(|(success, message)| Packet::AuthResponse(AuthResponse { success, message })),
        (
            "[a-f0-9]{0,64}",
            "[a-zA-Z]{0,32}",
            "[a-zA-Z]{0,32}",
            "(ttf|otf|woff2)",
            any::<bool>()
        )
            .prop_map(|(file_hash, name, style, file_type, install)| {
                Packet::FontInstallRequest(FontInstallRequest {
                    file_hash,
                    name,
                    style,
                    file_type,
                    install,
                })
            }),
        (any::<bool>(), "[a-zA-Z0-9.]{0,256}").prop_map(|(success, message)| {
            Packet::FontInstallResponse(FontInstallResponse { success, message })
        }),
    ]
}

fn encode_all(registry: &PacketRegistry, packets: &[Packet]) -> Vec<u8> {
    let mut wire = BytesMut::new();
    for packet in packets {
        registry.encode_frame_into(packet, &mut wire).unwrap();
    }
    wire.to_vec()
}

fn decode_chunked(registry: Arc<PacketRegistry>, wire: &[u8], chunks: &[usize]) -> Vec<Packet> {
    let mut codec = FrameCodec::new(registry.clone()).with_max_buffer_size(1 << 20);
    let mut buf = BytesMut::new();
    let mut out = Vec::new();
    let mut offset = 0;
    let mut sizes = chunks.iter().cycle();

    while offset < wire.len() {
        let step = (*sizes.next().unwrap()).min(wire.len() - offset);
        buf.put_slice(&wire[offset..offset + step]);
        offset += step;
        for frame in codec.feed(&mut buf).unwrap() {
            let packet = registry.decode(frame.packet_type, &frame.payload).unwrap();
            out.push(sanitized(packet));
        }
    }
    assert!(buf.is_empty(), "complete input must leave nothing buffered");
    out
}

// Property: decoded packets do not depend on chunk boundaries
proptest! {
    #[test]
    fn prop_chunking_does_not_matter(
        packets in prop::collection::vec(packet_strategy(), 1..20),
        chunks in prop::collection::vec(1usize..300, 1..16),
    ) {
        let registry = Arc::new(PacketRegistry::standard());
        let wire = encode_all(&registry, &packets);

        let whole = decode_chunked(registry.clone(), &wire, &[wire.len()]);
        let pieces = decode_chunked(registry, &wire, &chunks);

        prop_assert_eq!(&whole, &packets);
        prop_assert_eq!(&pieces, &packets);
    }
}

// Property: byte-at-a-time delivery yields the same packets
proptest! {
    #[test]
    fn prop_single_byte_delivery(packets in prop::collection::vec(packet_strategy(), 1..5)) {
        let registry = Arc::new(PacketRegistry::standard());
        let wire = encode_all(&registry, &packets);
        prop_assert_eq!(decode_chunked(registry, &wire, &[1]), packets);
    }
}

// Property: unknown type headers in front of a frame cost exactly two bytes each
proptest! {
    #[test]
    fn prop_unknown_headers_are_skipped(
        unknown in prop::collection::vec(4u16..=u16::MAX, 0..10),
        packet in packet_strategy(),
    ) {
        let registry = Arc::new(PacketRegistry::standard());
        let mut wire = Vec::new();
        for ty in &unknown {
            wire.extend_from_slice(&ty.to_le_bytes());
        }
        wire.extend(encode_all(&registry, std::slice::from_ref(&packet)));

        let mut codec = FrameCodec::new(registry.clone());
        let mut buf = BytesMut::from(&wire[..]);
        let frames = codec.feed(&mut buf).unwrap();

        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(codec.skipped_headers(), unknown.len() as u64);
        let decoded = registry.decode(frames[0].packet_type, &frames[0].payload).unwrap();
        prop_assert_eq!(sanitized(decoded), packet);
    }
}

// Property: arbitrary bytes never panic the decoder
proptest! {
    #[test]
    fn prop_arbitrary_input_never_panics(data in prop::collection::vec(any::<u8>(), 0..2048)) {
        let registry = Arc::new(PacketRegistry::standard());
        let mut codec = FrameCodec::new(registry.clone()).with_max_buffer_size(4096);
        let mut buf = BytesMut::from(&data[..]);

        let frames = codec.feed(&mut buf).unwrap();
        for frame in frames {
            // decoding may fail on garbage, but must not panic
            let _ = registry.decode(frame.packet_type, &frame.payload);
        }
        prop_assert!(buf.len() < registry.max_frame_size());
    }
}

// Property: a string longer than its field width is refused, never truncated
proptest! {
    #[test]
    fn prop_overlong_field_rejected(extra in 1usize..64) {
        let registry = PacketRegistry::standard();
        let packet = Packet::AuthRequest(AuthRequest {
            version: 1,
            client_name: "n".repeat(32 + extra),
            client_hwid: "hw".into(),
        });
        let err = registry.encode_frame(&packet).unwrap_err();
        let is_overflow = matches!(err, ProtocolError::FieldOverflow { field: "client_name", .. });
        prop_assert!(is_overflow);
    }
}
