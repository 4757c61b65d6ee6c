//! # Packet Registry
//!
//! Maps a numeric packet type to its fixed payload size and codec functions.
//!
//! The registry is filled during server setup and then shared read-only
//! (`Arc<PacketRegistry>`) by every connection. A type can be registered
//! once; a second registration for the same type is rejected.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::core::packet::{
    AuthRequest, AuthResponse, FixedPayload, FontInstallRequest, FontInstallResponse, Packet,
    PacketType, TYPE_HEADER_SIZE,
};
use crate::error::{constants, ProtocolError, Result};

/// Appends exactly `payload_size` bytes for the packet
pub type EncodeFn = fn(&Packet, &mut BytesMut) -> Result<()>;

/// Parses exactly `payload_size` bytes into a packet
pub type DecodeFn = fn(&[u8]) -> Result<Packet>;

/// Size and codec pair for one packet type.
#[derive(Debug, Clone, Copy)]
pub struct PacketDescriptor {
    pub packet_type: u16,
    pub payload_size: u16,
    pub encode: EncodeFn,
    pub decode: DecodeFn,
}

fn variant_mismatch(expected: PacketType, packet: &Packet) -> ProtocolError {
    ProtocolError::malformed(
        expected.as_u16(),
        format!(
            "{}: got {}",
            constants::ERR_VARIANT_MISMATCH,
            packet.packet_type()
        ),
    )
}

macro_rules! standard_descriptor {
    ($variant:ident) => {
        PacketDescriptor {
            packet_type: PacketType::$variant.as_u16(),
            payload_size: <$variant as FixedPayload>::SIZE as u16,
            encode: |packet, dst| match packet {
                Packet::$variant(p) => p.encode_into(dst),
                other => Err(variant_mismatch(PacketType::$variant, other)),
            },
            decode: |src| <$variant as FixedPayload>::decode_from(src).map(Packet::$variant),
        }
    };
}

impl PacketDescriptor {
    /// Descriptors for the four protocol packets, in type order
    pub fn standard() -> [PacketDescriptor; 4] {
        [
            standard_descriptor!(AuthRequest),
            standard_descriptor!(AuthResponse),
            standard_descriptor!(FontInstallRequest),
            standard_descriptor!(FontInstallResponse),
        ]
    }
}

/// Lookup table from packet type to descriptor
#[derive(Debug, Clone, Default)]
pub struct PacketRegistry {
    descriptors: HashMap<u16, PacketDescriptor>,
}

impl PacketRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four protocol packets
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for descriptor in PacketDescriptor::standard() {
            registry.descriptors.insert(descriptor.packet_type, descriptor);
        }
        registry
    }

    /// Store a descriptor. Fails on a zero payload size or an already
    /// registered type.
    ///
    /// An extra type id can only alias one of the [`Packet`] variants. Its
    /// frames decode into that variant and are dispatched to the variant's
    /// listeners; encoding always writes the variant's own type id.
    pub fn register(&mut self, descriptor: PacketDescriptor) -> Result<()> {
        if descriptor.payload_size == 0 {
            return Err(ProtocolError::ConfigError(format!(
                "packet type {} declares a zero payload size",
                descriptor.packet_type
            )));
        }
        if self.descriptors.contains_key(&descriptor.packet_type) {
            return Err(ProtocolError::DuplicatePacketType(descriptor.packet_type));
        }
        debug!(
            packet_type = descriptor.packet_type,
            payload_size = descriptor.payload_size,
            "Registered packet descriptor"
        );
        self.descriptors.insert(descriptor.packet_type, descriptor);
        Ok(())
    }

    #[inline]
    pub fn descriptor(&self, packet_type: u16) -> Option<&PacketDescriptor> {
        self.descriptors.get(&packet_type)
    }

    #[inline]
    pub fn payload_size(&self, packet_type: u16) -> Option<usize> {
        self.descriptor(packet_type)
            .map(|d| usize::from(d.payload_size))
    }

    pub fn contains(&self, packet_type: u16) -> bool {
        self.descriptors.contains_key(&packet_type)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Registered types in ascending order
    pub fn types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.descriptors.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Largest complete frame (header included) any registered type can produce
    pub fn max_frame_size(&self) -> usize {
        self.descriptors
            .values()
            .map(|d| TYPE_HEADER_SIZE + usize::from(d.payload_size))
            .max()
            .unwrap_or(TYPE_HEADER_SIZE)
    }

    /// Encode just the payload of `packet`.
    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let packet_type = packet.packet_type().as_u16();
        let descriptor = self
            .descriptor(packet_type)
            .ok_or(ProtocolError::UnknownPacketType(packet_type))?;

        let mut buf = BytesMut::with_capacity(usize::from(descriptor.payload_size));
        Self::encode_payload(descriptor, packet, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Encode `[type LE][payload]` as one contiguous frame.
    pub fn encode_frame(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode_frame_into(packet, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append a full frame to `dst`. On failure `dst` is left as it was.
    pub fn encode_frame_into(&self, packet: &Packet, dst: &mut BytesMut) -> Result<()> {
        let packet_type = packet.packet_type().as_u16();
        let descriptor = self
            .descriptor(packet_type)
            .ok_or(ProtocolError::UnknownPacketType(packet_type))?;

        let start = dst.len();
        dst.reserve(TYPE_HEADER_SIZE + usize::from(descriptor.payload_size));
        dst.put_u16_le(packet_type);
        if let Err(e) = Self::encode_payload(descriptor, packet, dst) {
            dst.truncate(start);
            return Err(e);
        }
        Ok(())
    }

    fn encode_payload(
        descriptor: &PacketDescriptor,
        packet: &Packet,
        dst: &mut BytesMut,
    ) -> Result<()> {
        let start = dst.len();
        if let Err(e) = (descriptor.encode)(packet, dst) {
            dst.truncate(start);
            return Err(e);
        }
        let written = dst.len() - start;
        if written != usize::from(descriptor.payload_size) {
            dst.truncate(start);
            return Err(ProtocolError::malformed(
                descriptor.packet_type,
                format!(
                    "encoder wrote {written} bytes, descriptor declares {}",
                    descriptor.payload_size
                ),
            ));
        }
        Ok(())
    }

    /// Decode a payload of a registered type.
    pub fn decode(&self, packet_type: u16, raw: &[u8]) -> Result<Packet> {
        let descriptor = self
            .descriptor(packet_type)
            .ok_or(ProtocolError::UnknownPacketType(packet_type))?;

        if raw.len() != usize::from(descriptor.payload_size) {
            return Err(ProtocolError::malformed(
                packet_type,
                format!(
                    "{}: got {}, expected {}",
                    constants::ERR_PAYLOAD_LENGTH,
                    raw.len(),
                    descriptor.payload_size
                ),
            ));
        }
        (descriptor.decode)(raw)
    }
}
