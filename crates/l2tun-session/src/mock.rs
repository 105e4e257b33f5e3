//! In-memory sockets for exercising the workers without a network

use l2tun_transport::{TransportError, TransportResult, TunnelSocket};
use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Stream side that hands out a fixed script of chunks, one per `recv`.
///
/// A chunk larger than the caller's buffer is split across calls. After
/// the script runs out, `recv` reports the configured ending.
pub struct ScriptedStream {
    chunks: Mutex<VecDeque<Vec<u8>>>,
    ending: Ending,
    sent: Mutex<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
pub enum Ending {
    /// Peer closed the connection (`recv` returns 0)
    Closed,
    /// Connection reset
    Reset,
}

impl ScriptedStream {
    pub fn new(chunks: Vec<Vec<u8>>, ending: Ending) -> Self {
        Self {
            chunks: Mutex::new(chunks.into()),
            ending,
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Deliver `bytes` in pieces of `size`
    pub fn chunked(bytes: &[u8], size: usize, ending: Ending) -> Self {
        Self::new(bytes.chunks(size).map(<[u8]>::to_vec).collect(), ending)
    }

    pub fn sent(&self) -> Vec<u8> {
        self.sent.lock().unwrap().clone()
    }
}

impl TunnelSocket for ScriptedStream {
    fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut chunks = self.chunks.lock().unwrap();
        let Some(mut chunk) = chunks.pop_front() else {
            return match self.ending {
                Ending::Closed => Ok(0),
                Ending::Reset => Err(TransportError::ConnectionReset),
            };
        };

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            chunks.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn cancel(&self) -> TransportResult<()> {
        Ok(())
    }
}

/// Link side backed by a queue of frames to capture and a log of injected
/// frames. `recv` blocks while the queue is empty until `cancel` or
/// `hang_up` is called.
#[derive(Default)]
pub struct QueueLink {
    state: Mutex<LinkState>,
    cond: Condvar,
}

#[derive(Default)]
struct LinkState {
    inbound: VecDeque<Vec<u8>>,
    injected: Vec<Vec<u8>>,
    cancelled: bool,
    hung_up: bool,
}

impl QueueLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_frames(frames: Vec<Vec<u8>>) -> Self {
        let link = Self::new();
        link.state.lock().unwrap().inbound = frames.into();
        link
    }

    /// Make the next `recv` after the queue drains return 0
    pub fn hang_up(&self) {
        self.state.lock().unwrap().hung_up = true;
        self.cond.notify_all();
    }

    pub fn injected(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().injected.clone()
    }
}

impl TunnelSocket for QueueLink {
    fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return Err(TransportError::Cancelled);
            }
            if let Some(frame) = state.inbound.pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        self.state.lock().unwrap().injected.push(buf.to_vec());
        Ok(buf.len())
    }

    fn cancel(&self) -> TransportResult<()> {
        self.state.lock().unwrap().cancelled = true;
        self.cond.notify_all();
        Ok(())
    }
}
