//! # Packets
//!
//! Typed payloads for the four packets of the agent protocol and the
//! [`Packet`] union that carries them through the engine.
//!
//! ## Wire Layout
//! ```text
//! [Type(2, LE)] [Payload(N)]      N is fixed per type, never transmitted
//!
//! 0 AuthRequest          version:u32  client_name:char[32]  client_hwid:char[64]       100
//! 1 AuthResponse         success:u8   message:char[256]                                257
//! 2 FontInstallRequest   file_hash:char[64] name:char[32] style:char[32]
//!                        file_type:char[32] install:u8                                 161
//! 3 FontInstallResponse  success:u8   message:char[256]                                257
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::core::wire::{put_bool, put_padded_str, FieldReader};
use crate::error::{ProtocolError, Result};

pub const CLIENT_NAME_WIDTH: usize = 32;
pub const CLIENT_HWID_WIDTH: usize = 64;
pub const MESSAGE_WIDTH: usize = 256;
pub const FILE_HASH_WIDTH: usize = 64;
pub const FONT_NAME_WIDTH: usize = 32;
pub const FONT_STYLE_WIDTH: usize = 32;
pub const FILE_TYPE_WIDTH: usize = 32;

/// Size of the type prefix in front of every payload
pub const TYPE_HEADER_SIZE: usize = 2;

/// Numeric packet types understood by the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum PacketType {
    AuthRequest = 0,
    AuthResponse = 1,
    FontInstallRequest = 2,
    FontInstallResponse = 3,
}

impl PacketType {
    pub const ALL: [PacketType; 4] = [
        PacketType::AuthRequest,
        PacketType::AuthResponse,
        PacketType::FontInstallRequest,
        PacketType::FontInstallResponse,
    ];

    #[inline]
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::AuthRequest => "AuthRequest",
            PacketType::AuthResponse => "AuthResponse",
            PacketType::FontInstallRequest => "FontInstallRequest",
            PacketType::FontInstallResponse => "FontInstallResponse",
        }
    }
}

impl TryFrom<u16> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(PacketType::AuthRequest),
            1 => Ok(PacketType::AuthResponse),
            2 => Ok(PacketType::FontInstallRequest),
            3 => Ok(PacketType::FontInstallResponse),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.as_u16())
    }
}

/// A payload with a fixed wire size bound to one packet type.
pub trait FixedPayload: Sized {
    const PACKET_TYPE: PacketType;
    const SIZE: usize;

    /// Append exactly `SIZE` bytes to `dst`.
    fn encode_into(&self, dst: &mut BytesMut) -> Result<()>;

    /// Parse exactly `SIZE` bytes. String fields keep their NUL padding.
    fn decode_from(src: &[u8]) -> Result<Self>;
}

/// Sent by an agent right after connecting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthRequest {
    pub version: u32,
    pub client_name: String,
    pub client_hwid: String,
}

impl FixedPayload for AuthRequest {
    const PACKET_TYPE: PacketType = PacketType::AuthRequest;
    const SIZE: usize = 4 + CLIENT_NAME_WIDTH + CLIENT_HWID_WIDTH;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        dst.put_u32_le(self.version);
        put_padded_str(dst, "client_name", &self.client_name, CLIENT_NAME_WIDTH)?;
        put_padded_str(dst, "client_hwid", &self.client_hwid, CLIENT_HWID_WIDTH)
    }

    fn decode_from(src: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(Self::PACKET_TYPE.as_u16(), src);
        let packet = Self {
            version: r.u32_le("version")?,
            client_name: r.padded_str("client_name", CLIENT_NAME_WIDTH)?,
            client_hwid: r.padded_str("client_hwid", CLIENT_HWID_WIDTH)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

/// Server verdict on an [`AuthRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
}

impl AuthResponse {
    pub fn accepted(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

impl FixedPayload for AuthResponse {
    const PACKET_TYPE: PacketType = PacketType::AuthResponse;
    const SIZE: usize = 1 + MESSAGE_WIDTH;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        put_bool(dst, self.success);
        put_padded_str(dst, "message", &self.message, MESSAGE_WIDTH)
    }

    fn decode_from(src: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(Self::PACKET_TYPE.as_u16(), src);
        let packet = Self {
            success: r.bool("success")?,
            message: r.padded_str("message", MESSAGE_WIDTH)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

/// Asks an agent to install (`install = true`) or remove (`install = false`)
/// a font. The agent rebuilds the download link from the hash and file type.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontInstallRequest {
    pub file_hash: String,
    pub name: String,
    pub style: String,
    pub file_type: String,
    pub install: bool,
}

impl FixedPayload for FontInstallRequest {
    const PACKET_TYPE: PacketType = PacketType::FontInstallRequest;
    const SIZE: usize = FILE_HASH_WIDTH + FONT_NAME_WIDTH + FONT_STYLE_WIDTH + FILE_TYPE_WIDTH + 1;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        put_padded_str(dst, "file_hash", &self.file_hash, FILE_HASH_WIDTH)?;
        put_padded_str(dst, "name", &self.name, FONT_NAME_WIDTH)?;
        put_padded_str(dst, "style", &self.style, FONT_STYLE_WIDTH)?;
        put_padded_str(dst, "file_type", &self.file_type, FILE_TYPE_WIDTH)?;
        put_bool(dst, self.install);
        Ok(())
    }

    fn decode_from(src: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(Self::PACKET_TYPE.as_u16(), src);
        let packet = Self {
            file_hash: r.padded_str("file_hash", FILE_HASH_WIDTH)?,
            name: r.padded_str("name", FONT_NAME_WIDTH)?,
            style: r.padded_str("style", FONT_STYLE_WIDTH)?,
            file_type: r.padded_str("file_type", FILE_TYPE_WIDTH)?,
            install: r.bool("install")?,
        };
        r.finish()?;
        Ok(packet)
    }
}

/// Agent report on a [`FontInstallRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontInstallResponse {
    pub success: bool,
    pub message: String,
}

impl FixedPayload for FontInstallResponse {
    const PACKET_TYPE: PacketType = PacketType::FontInstallResponse;
    const SIZE: usize = 1 + MESSAGE_WIDTH;

    fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        put_bool(dst, self.success);
        put_padded_str(dst, "message", &self.message, MESSAGE_WIDTH)
    }

    fn decode_from(src: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(Self::PACKET_TYPE.as_u16(), src);
        let packet = Self {
            success: r.bool("success")?,
            message: r.padded_str("message", MESSAGE_WIDTH)?,
        };
        r.finish()?;
        Ok(packet)
    }
}

/// A decoded or outgoing packet, tagged by its type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    AuthRequest(AuthRequest),
    AuthResponse(AuthResponse),
    FontInstallRequest(FontInstallRequest),
    FontInstallResponse(FontInstallResponse),
}

impl Packet {
    #[inline]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::AuthRequest(_) => PacketType::AuthRequest,
            Packet::AuthResponse(_) => PacketType::AuthResponse,
            Packet::FontInstallRequest(_) => PacketType::FontInstallRequest,
            Packet::FontInstallResponse(_) => PacketType::FontInstallResponse,
        }
    }
}

impl From<AuthRequest> for Packet {
    fn from(p: AuthRequest) -> Self {
        Packet::AuthRequest(p)
    }
}

impl From<AuthResponse> for Packet {
    fn from(p: AuthResponse) -> Self {
        Packet::AuthResponse(p)
    }
}

impl From<FontInstallRequest> for Packet {
    fn from(p: FontInstallRequest) -> Self {
        Packet::FontInstallRequest(p)
    }
}

impl From<FontInstallResponse> for Packet {
    fn from(p: FontInstallResponse) -> Self {
        Packet::FontInstallResponse(p)
    }
}
