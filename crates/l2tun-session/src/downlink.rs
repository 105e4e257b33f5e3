//! Stream → link direction
//!
//! The stream delivers bytes with no regard for frame boundaries, so they
//! are collected in a [`ReassemblyBuffer`] until whole frames are present.
//! Each pass drains every complete frame in the buffer before reading again.

use crate::reassembly::ReassemblyBuffer;
use crate::stats::TrafficCounter;
use crate::{log_exit, Completion, ReleaseOnExit, WorkerError};
use l2tun_proto::{Frame, FrameKind};
use l2tun_transport::TunnelSocket;
use tracing::{debug, trace};

/// Worker entry point. Runs until the stream closes, a frame is malformed,
/// or any socket operation fails, then releases `completion`.
pub fn run<L, S>(
    mtu: usize,
    link: &L,
    stream: &S,
    completion: &Completion,
    counter: &TrafficCounter,
) -> Result<(), WorkerError>
where
    L: TunnelSocket + ?Sized,
    S: TunnelSocket + ?Sized,
{
    let _release = ReleaseOnExit(completion);
    debug!(mtu, "Downlink started");

    let result = forward(mtu, link, stream, counter);
    log_exit("downlink", &result);
    result
}

fn forward<L, S>(
    mtu: usize,
    link: &L,
    stream: &S,
    counter: &TrafficCounter,
) -> Result<(), WorkerError>
where
    L: TunnelSocket + ?Sized,
    S: TunnelSocket + ?Sized,
{
    let mut rx = ReassemblyBuffer::new(mtu);

    loop {
        // Header of the frame at the front
        let header = loop {
            if let Some(header) = rx.front_header() {
                break header;
            }
            if receive(stream, &mut rx)? == 0 {
                if rx.is_empty() {
                    debug!("Stream closed");
                    return Ok(());
                }
                return Err(WorkerError::TruncatedStream { pending: rx.len() });
            }
        };

        // Reject before waiting on a payload that could never fit
        header.check_length(mtu)?;

        while rx.len() < header.frame_len() {
            if receive(stream, &mut rx)? == 0 {
                return Err(WorkerError::TruncatedStream { pending: rx.len() });
            }
        }

        let consumed = drain(mtu, rx.data(), link, counter)?;
        rx.consume(consumed);
    }
}

/// Read once from the stream into the buffer's free space
fn receive<S>(stream: &S, rx: &mut ReassemblyBuffer) -> Result<usize, WorkerError>
where
    S: TunnelSocket + ?Sized,
{
    let n = stream.recv(rx.spare_mut())?;
    rx.commit(n);
    Ok(n)
}

/// Deliver every complete frame at the start of `data`. Returns the number
/// of bytes consumed; a trailing partial frame is left for the next pass.
fn drain<L>(
    mtu: usize,
    data: &[u8],
    link: &L,
    counter: &TrafficCounter,
) -> Result<usize, WorkerError>
where
    L: TunnelSocket + ?Sized,
{
    let mut cursor = 0;

    while let Some(frame) = Frame::parse(&data[cursor..]) {
        frame.header.check_length(mtu)?;

        match frame.header.kind {
            FrameKind::Packet => {
                let sent = link.send(frame.payload)?;
                assert_eq!(sent, frame.payload.len(), "short write on link");
                counter.record(sent);
            }
            FrameKind::Nop => trace!("NOP"),
            kind => debug!(?kind, length = frame.payload.len(), "Ignoring frame"),
        }

        cursor += frame.encoded_len();
    }

    Ok(cursor)
}
