//! # Fixed-Width Wire Fields
//!
//! Every payload in this protocol is a concatenation of fixed-width fields:
//! NUL-padded UTF-8 strings, little-endian integers, and single-byte booleans.
//! No field carries its own length.
//!
//! Encoding rejects strings longer than their declared width instead of
//! truncating them. Decoding returns strings with their padding intact;
//! stripping it is the sanitizer's job.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{constants, ProtocolError, Result};

/// Write `value` as a NUL-padded field of exactly `width` bytes.
pub fn put_padded_str(
    dst: &mut BytesMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<()> {
    let raw = value.as_bytes();
    if raw.len() > width {
        return Err(ProtocolError::FieldOverflow {
            field,
            width,
            len: raw.len(),
        });
    }
    dst.put_slice(raw);
    dst.put_bytes(0, width - raw.len());
    Ok(())
}

/// Write a boolean as a single 0/1 byte.
#[inline]
pub fn put_bool(dst: &mut BytesMut, value: bool) {
    dst.put_u8(u8::from(value));
}

/// Sequential reader over one payload, tagged with the packet type so every
/// failure comes back as a [`ProtocolError::MalformedFrame`] for that type.
pub struct FieldReader<'a> {
    packet_type: u16,
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(packet_type: u16, buf: &'a [u8]) -> Self {
        Self { packet_type, buf }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn need(&self, field: &'static str, width: usize) -> Result<()> {
        if self.buf.len() < width {
            return Err(ProtocolError::malformed(
                self.packet_type,
                format!(
                    "field '{field}' needs {width} bytes, {} left",
                    self.buf.len()
                ),
            ));
        }
        Ok(())
    }

    pub fn u32_le(&mut self, field: &'static str) -> Result<u32> {
        self.need(field, 4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn bool(&mut self, field: &'static str) -> Result<bool> {
        self.need(field, 1)?;
        match self.buf.get_u8() {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(ProtocolError::malformed(
                self.packet_type,
                format!("{} (field '{field}' = {other})", constants::ERR_INVALID_BOOL),
            )),
        }
    }

    /// Read a padded string field. Padding is preserved.
    pub fn padded_str(&mut self, field: &'static str, width: usize) -> Result<String> {
        self.need(field, width)?;
        let (raw, rest) = self.buf.split_at(width);
        self.buf = rest;
        String::from_utf8(raw.to_vec()).map_err(|_| {
            ProtocolError::malformed(
                self.packet_type,
                format!("{} (field '{field}')", constants::ERR_INVALID_UTF8),
            )
        })
    }

    /// Fail if any bytes are left over after the last field.
    pub fn finish(self) -> Result<()> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::malformed(
                self.packet_type,
                format!("{} trailing bytes", self.buf.len()),
            ))
        }
    }
}
