//! Packet buffer implementation
//!
//! Provides a byte buffer with the little-endian fixed-width read/write
//! operations used by every frame on the wire:
//! - Unsigned and signed integers (8, 16, 32, 64 bit)
//! - Length-prefixed and trailing UTF-8 strings
//! - Raw byte runs
//!
//! Reads never panic; running past the end yields
//! [`ProtocolError::Truncated`] tagged with the opcode being decoded.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Maximum inbound frame size (64KB)
pub const MAX_PACKET_SIZE: usize = 65535;

/// Packet buffer for reading and writing game protocol data
#[derive(Debug, Clone, Default)]
pub struct PacketBuffer {
    /// Internal byte buffer
    data: BytesMut,
    /// Current read position
    read_pos: usize,
    /// Opcode reported in truncation errors
    opcode: u8,
}

impl PacketBuffer {
    /// Create a new empty packet buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a packet buffer with a specific capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: BytesMut::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Create a packet buffer over the payload of `opcode`
    pub fn for_opcode(opcode: u8, payload: &[u8]) -> Self {
        Self {
            data: BytesMut::from(payload),
            read_pos: 0,
            opcode,
        }
    }

    // ============ Properties ============

    /// Get the current read position
    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_pos
    }

    /// Get the total length of the buffer
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the number of bytes remaining to read
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.read_pos)
    }

    /// Get a reference to the underlying bytes
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze the written bytes
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }

    /// Clear the buffer and reset positions
    pub fn clear(&mut self) {
        self.data.clear();
        self.read_pos = 0;
    }

    // ============ Reading ============

    /// Take the next `count` bytes
    fn take(&mut self, count: usize) -> Result<&[u8], ProtocolError> {
        let remaining = self.remaining();
        if remaining < count {
            return Err(ProtocolError::Truncated {
                opcode: self.opcode,
                needed: count - remaining,
            });
        }
        let start = self.read_pos;
        self.read_pos += count;
        Ok(&self.data[start..start + count])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.take_array().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        self.take_array().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.take_array().map(u32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.take_array().map(u64::from_le_bytes)
    }

    /// Read `length` raw bytes
    pub fn read_bytes(&mut self, length: usize) -> Result<Bytes, ProtocolError> {
        self.take(length).map(Bytes::copy_from_slice)
    }

    /// Read everything left
    pub fn read_rest(&mut self) -> Bytes {
        let rest = Bytes::copy_from_slice(&self.data[self.read_pos.min(self.data.len())..]);
        self.read_pos = self.data.len();
        rest
    }

    /// Read a u8 length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_u8()? as usize;
        let raw = self.take(len)?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtocolError::InvalidText)
    }

    /// Read the remaining bytes as UTF-8 text
    pub fn read_text(&mut self) -> Result<String, ProtocolError> {
        let rest = self.read_rest();
        String::from_utf8(rest.to_vec()).map_err(|_| ProtocolError::InvalidText)
    }

    // ============ Writing ============

    pub fn write_u8(&mut self, value: u8) {
        self.data.put_u8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.data.put_u16_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.data.put_i16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.data.put_u32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.data.put_u64_le(value);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.put_slice(bytes);
    }

    /// Write a u8 length-prefixed string, truncated to 255 bytes on a char boundary
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(u8::MAX as usize);
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        self.write_u8(end as u8);
        self.write_bytes(&value.as_bytes()[..end]);
    }
}
