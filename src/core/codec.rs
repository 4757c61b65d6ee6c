//! # Frame Codec
//!
//! Tokio codec that turns an unbounded byte stream into fixed-length frames.
//!
//! A frame is `[type(2, LE)][payload(S)]` where `S` comes from the registry.
//! The decoder never fails on payload content: it only slices raw frames
//! off the buffer, and the caller decodes each one through the registry so
//! a single malformed frame cannot end the stream.
//!
//! Unknown types are skipped by dropping only their 2-byte header. If the
//! peer meant to send a payload behind it, the stream desynchronises until
//! the scan lands on a known type again.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::core::packet::{Packet, TYPE_HEADER_SIZE};
use crate::core::registry::PacketRegistry;
use crate::error::{ProtocolError, Result};

/// Default cap on bytes buffered for one connection (64 KiB)
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// One complete frame, not yet decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub packet_type: u16,
    pub payload: Bytes,
}

impl RawFrame {
    /// Total bytes this frame occupied on the wire
    pub fn wire_len(&self) -> usize {
        TYPE_HEADER_SIZE + self.payload.len()
    }
}

#[derive(Debug, Clone)]
pub struct FrameCodec {
    registry: Arc<PacketRegistry>,
    max_buffer_size: usize,
    skipped_headers: u64,
}

impl FrameCodec {
    pub fn new(registry: Arc<PacketRegistry>) -> Self {
        Self {
            registry,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            skipped_headers: 0,
        }
    }

    /// Cap the bytes held back for an incomplete frame. Complete frames are
    /// always extracted first; a remainder larger than the cap fails the
    /// stream with [`ProtocolError::BufferOverflow`].
    pub fn with_max_buffer_size(mut self, limit: usize) -> Self {
        self.max_buffer_size = limit;
        self
    }

    pub fn registry(&self) -> &Arc<PacketRegistry> {
        &self.registry
    }

    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Number of unknown type headers dropped so far
    pub fn skipped_headers(&self) -> u64 {
        self.skipped_headers
    }

    /// Extract every complete frame from `buf`, in order. Whatever follows
    /// the last complete frame is left in `buf` for the next call.
    pub fn feed(&mut self, buf: &mut BytesMut) -> Result<Vec<RawFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.decode(buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn check_retained(&self, src: &BytesMut) -> Result<()> {
        if src.len() > self.max_buffer_size {
            return Err(ProtocolError::BufferOverflow {
                size: src.len(),
                limit: self.max_buffer_size,
            });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>> {
        while src.len() >= TYPE_HEADER_SIZE {
            let packet_type = u16::from_le_bytes([src[0], src[1]]);

            let Some(payload_size) = self.registry.payload_size(packet_type) else {
                warn!(packet_type, "Unknown packet type, dropping header");
                src.advance(TYPE_HEADER_SIZE);
                self.skipped_headers += 1;
                continue;
            };

            let frame_len = TYPE_HEADER_SIZE + payload_size;
            if src.len() < frame_len {
                self.check_retained(src)?;
                trace!(
                    packet_type,
                    buffered = src.len(),
                    needed = frame_len,
                    "Partial frame, waiting for more data"
                );
                src.reserve(frame_len - src.len());
                return Ok(None);
            }

            let mut frame = src.split_to(frame_len);
            frame.advance(TYPE_HEADER_SIZE);
            return Ok(Some(RawFrame {
                packet_type,
                payload: frame.freeze(),
            }));
        }

        self.check_retained(src)?;
        Ok(None)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                if !src.is_empty() {
                    debug!(bytes = src.len(), "Discarding incomplete frame at end of stream");
                    src.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<()> {
        self.registry.encode_frame_into(&item, dst)
    }
}

impl<'a> Encoder<&'a Packet> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a Packet, dst: &mut BytesMut) -> Result<()> {
        self.registry.encode_frame_into(item, dst)
    }
}
