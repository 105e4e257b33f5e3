//! Link → stream direction
//!
//! Captures frames from the link, prefixes each with a PACKET header and
//! writes the result to the stream.

use crate::stats::TrafficCounter;
use crate::{log_exit, Completion, ReleaseOnExit, WorkerError};
use l2tun_proto::{encode_packet, HEADER_SIZE};
use l2tun_transport::TunnelSocket;
use tracing::debug;

/// Worker entry point. Runs until the link shuts down or any socket
/// operation fails, then releases `completion`.
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
    debug!(mtu, "Uplink started");

    let result = forward(mtu, link, stream, counter);
    log_exit("uplink", &result);
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
    // Header space first, so the payload is framed without copying.
    let mut buf = vec![0u8; HEADER_SIZE + mtu];

    loop {
        let n = link.recv(&mut buf[HEADER_SIZE..])?;
        if n == 0 {
            debug!("Link closed");
            return Ok(());
        }

        let total = encode_packet(&mut buf, n)?;
        let sent = stream.send(&buf[..total])?;
        assert_eq!(sent, total, "short write on stream");
        counter.record(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Ending, QueueLink, ScriptedStream};
    use l2tun_proto::{Frame, FrameKind};
    use l2tun_transport::TransportError;

    fn frames_in(mut bytes: &[u8]) -> Vec<(FrameKind, Vec<u8>)> {
        let mut out = Vec::new();
        while let Some(frame) = Frame::parse(bytes) {
            out.push((frame.header.kind, frame.payload.to_vec()));
            bytes = &bytes[frame.encoded_len()..];
        }
        assert!(bytes.is_empty(), "trailing bytes after last frame");
        out
    }

    #[test]
    fn test_frames_are_wrapped_in_order() {
        let link = QueueLink::with_frames(vec![b"one".to_vec(), vec![0xAB; 60], b"three".to_vec()]);
        link.hang_up();
        let stream = ScriptedStream::new(Vec::new(), Ending::Closed);
        let completion = Completion::new();
        let counter = TrafficCounter::new();

        run(1518, &link, &stream, &completion, &counter).unwrap();

        let frames = frames_in(&stream.sent());
        assert_eq!(
            frames,
            vec![
                (FrameKind::Packet, b"one".to_vec()),
                (FrameKind::Packet, vec![0xAB; 60]),
                (FrameKind::Packet, b"three".to_vec()),
            ]
        );
        assert_eq!(counter.snapshot().frames, 3);
        assert_eq!(counter.snapshot().bytes, 68);
        assert!(completion.try_acquire());
    }

    #[test]
    fn test_full_mtu_frame() {
        let mtu = 1518;
        let link = QueueLink::with_frames(vec![vec![0x5A; mtu]]);
        link.hang_up();
        let stream = ScriptedStream::new(Vec::new(), Ending::Closed);

        run(mtu, &link, &stream, &Completion::new(), &TrafficCounter::new()).unwrap();

        let frames = frames_in(&stream.sent());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1.len(), mtu);
    }

    #[test]
    fn test_cancel_ends_worker() {
        let link = QueueLink::new();
        let stream = ScriptedStream::new(Vec::new(), Ending::Closed);
        let completion = Completion::new();
        link.cancel().unwrap();

        let err = run(1518, &link, &stream, &completion, &TrafficCounter::new()).unwrap_err();

        assert!(err.is_cancellation());
        assert!(matches!(err, WorkerError::Transport(TransportError::Cancelled)));
        assert!(completion.try_acquire());
        assert!(stream.sent().is_empty());
    }
}
