//! Fixed-capacity receive buffer for recovering frames from a byte stream

use l2tun_proto::{FrameHeader, HEADER_SIZE};

/// Bytes received from the stream but not yet turned into frames.
///
/// Holds `depth` maximum-size frames. Received bytes are appended at
/// `filled`; after each drain pass the unconsumed tail (a partial frame) is
/// moved to offset zero, so a pending frame always starts at the front.
///
/// Invariant: `consumed <= filled <= capacity`.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    buf: Box<[u8]>,
    filled: usize,
}

impl ReassemblyBuffer {
    /// Maximum-size frames the buffer holds by default
    pub const DEFAULT_DEPTH: usize = 4;

    pub fn new(mtu: usize) -> Self {
        Self::with_depth(mtu, Self::DEFAULT_DEPTH)
    }

    /// # Panics
    ///
    /// Panics if `depth < 2`: at least one complete frame plus the head of
    /// the next must fit.
    pub fn with_depth(mtu: usize, depth: usize) -> Self {
        assert!(depth >= 2, "reassembly buffer needs room for two frames");
        let capacity = (HEADER_SIZE + mtu) * depth;
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of buffered bytes
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    /// The buffered bytes, starting at a frame boundary
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    /// Header of the frame at the front, once all of its 8 bytes are here
    pub fn front_header(&self) -> Option<FrameHeader> {
        FrameHeader::decode(self.data())
    }

    /// Free space after the buffered bytes.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is full: a full buffer that still holds no
    /// complete frame can never make progress.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        assert!(
            self.filled < self.buf.len(),
            "reassembly buffer full without a complete frame ({} bytes)",
            self.filled
        );
        &mut self.buf[self.filled..]
    }

    /// Mark `n` bytes written into `spare_mut()` as received
    pub fn commit(&mut self, n: usize) {
        assert!(
            n <= self.buf.len() - self.filled,
            "commit of {} bytes overruns buffer ({} of {} filled)",
            n,
            self.filled,
            self.buf.len()
        );
        self.filled += n;
    }

    /// Drop the first `consumed` bytes and move any remainder to the front
    pub fn consume(&mut self, consumed: usize) {
        assert!(
            consumed <= self.filled,
            "consumed {} bytes but only {} are filled",
            consumed,
            self.filled
        );
        if consumed == self.filled {
            self.filled = 0;
            return;
        }
        self.buf.copy_within(consumed..self.filled, 0);
        self.filled -= consumed;
    }
}
