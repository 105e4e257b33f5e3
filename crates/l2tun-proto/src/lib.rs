//! Layer-2 Tunnel Protocol Definitions
//!
//! This crate defines the wire format used to carry raw Ethernet frames over
//! a TCP stream: a fixed 8-byte header followed by the frame itself.

pub mod frame;

pub use frame::{
    encode_frame, encode_packet, Frame, FrameHeader, FrameKind, ProtoError, HEADER_SIZE,
};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

