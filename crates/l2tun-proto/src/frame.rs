//! Tunnel frame encoding/decoding
//!
//! Frame format (all integers little-endian on the wire):
//! ```text
//! +--------+--------+--------+--------+
//! |   Kind (2B)     |  Reserved (2B)  |
//! +--------+--------+--------+--------+
//! |            Length (4B)            |
//! +--------+--------+--------+--------+
//! |         Payload (Length B)        |
//! +--------+--------+--------+--------+
//! ```

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// Frame header size: kind (2) + reserved (2) + length (4) = 8 bytes
pub const HEADER_SIZE: usize = 8;

/// Frame kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Carries nothing; reserved for keep-alive
    Nop,
    /// Reserved for connection setup, currently unused
    Hello,
    /// Encapsulated Ethernet frame
    Packet,
    /// Any other tag value
    Unknown(u16),
}

impl FrameKind {
    pub const NOP: u16 = 0x0000;
    pub const HELLO: u16 = 0x326C;
    pub const PACKET: u16 = 0x0001;

    pub fn as_u16(self) -> u16 {
        match self {
            FrameKind::Nop => Self::NOP,
            FrameKind::Hello => Self::HELLO,
            FrameKind::Packet => Self::PACKET,
            FrameKind::Unknown(raw) => raw,
        }
    }
}

impl From<u16> for FrameKind {
    fn from(value: u16) -> Self {
        match value {
            Self::NOP => FrameKind::Nop,
            Self::HELLO => FrameKind::Hello,
            Self::PACKET => FrameKind::Packet,
            other => FrameKind::Unknown(other),
        }
    }
}

impl From<FrameKind> for u16 {
    fn from(kind: FrameKind) -> Self {
        kind.as_u16()
    }
}

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("Payload length {length} exceeds link MTU {mtu}")]
    PayloadTooLarge { length: usize, mtu: usize },

    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

/// Fixed-size frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub length: u32,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, length: u32) -> Self {
        Self { kind, length }
    }

    pub fn packet(length: u32) -> Self {
        Self::new(FrameKind::Packet, length)
    }

    pub fn nop() -> Self {
        Self::new(FrameKind::Nop, 0)
    }

    /// Payload length as a buffer index
    pub fn payload_len(&self) -> usize {
        self.length as usize
    }

    /// Header plus payload
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len()
    }

    /// Reject payload lengths the local link cannot carry
    pub fn check_length(&self, mtu: usize) -> Result<(), ProtoError> {
        if self.payload_len() > mtu {
            return Err(ProtoError::PayloadTooLarge {
                length: self.payload_len(),
                mtu,
            });
        }
        Ok(())
    }

    /// Write the header into the first `HEADER_SIZE` bytes of `dst`.
    ///
    /// The reserved field is always written as zero.
    pub fn write_to(&self, dst: &mut [u8; HEADER_SIZE]) {
        let mut out = &mut dst[..];
        out.put_u16_le(self.kind.as_u16());
        out.put_u16_le(0);
        out.put_u32_le(self.length);
    }

    /// Read a header. The reserved field is ignored.
    pub fn read_from(src: &[u8; HEADER_SIZE]) -> Self {
        let mut input = &src[..];
        let kind = FrameKind::from(input.get_u16_le());
        let _reserved = input.get_u16_le();
        let length = input.get_u32_le();
        Self { kind, length }
    }

    /// Decode the header at the start of `buf`.
    ///
    /// Returns `None` if fewer than `HEADER_SIZE` bytes are available. The
    /// payload is not bounds-checked; callers confirm `buf.len() >=
    /// frame_len()` before touching it.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        buf.first_chunk::<HEADER_SIZE>().map(Self::read_from)
    }
}

/// A complete frame borrowed from a receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Parse a complete frame from the start of `buf`.
    ///
    /// Returns `None` if the header or its payload is not fully present.
    pub fn parse(buf: &'a [u8]) -> Option<Self> {
        let header = FrameHeader::decode(buf)?;
        let end = HEADER_SIZE.checked_add(header.payload_len())?;
        let payload = buf.get(HEADER_SIZE..end)?;
        Some(Self { header, payload })
    }

    pub fn encoded_len(&self) -> usize {
        self.header.frame_len()
    }
}

/// Prepend a PACKET header to a payload already stored at
/// `buf[HEADER_SIZE..HEADER_SIZE + payload_len]`.
///
/// Returns the total frame length. No payload bytes are copied.
pub fn encode_packet(buf: &mut [u8], payload_len: usize) -> Result<usize, ProtoError> {
    let needed = HEADER_SIZE + payload_len;
    if buf.len() < needed {
        return Err(ProtoError::BufferTooSmall {
            needed,
            available: buf.len(),
        });
    }
    let length = u32::try_from(payload_len).map_err(|_| ProtoError::PayloadTooLarge {
        length: payload_len,
        mtu: u32::MAX as usize,
    })?;

    if let Some(head) = buf.first_chunk_mut::<HEADER_SIZE>() {
        FrameHeader::packet(length).write_to(head);
    }
    Ok(needed)
}

/// Encode a standalone frame of any kind into a fresh buffer
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> Result<BytesMut, ProtoError> {
    let length = u32::try_from(payload.len()).map_err(|_| ProtoError::PayloadTooLarge {
        length: payload.len(),
        mtu: u32::MAX as usize,
    })?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u16_le(kind.as_u16());
    buf.put_u16_le(0);
    buf.put_u32_le(length);
    buf.put_slice(payload);
    Ok(buf)
}
