//! End-to-end: two sessions joined by loopback TCP, each bridged to an
//! in-process datagram pair standing in for a network interface.

use l2tun_session::Session;
use l2tun_transport::{AddressFamily, LinkSocket, StreamSocket};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::time::Duration;

const MTU: usize = 1518;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Link socket plus the "wire" end that plays the rest of the LAN
fn fake_link(name: &str) -> (LinkSocket, UnixDatagram) {
    let (ours, wire) = UnixDatagram::pair().unwrap();
    wire.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let link = LinkSocket::from_fd(OwnedFd::from(ours), name, MTU).unwrap();
    (link, wire)
}

fn tcp_pair() -> (StreamSocket, StreamSocket) {
    let listener = StreamSocket::listen(0, 1, AddressFamily::V4).unwrap();
    let port = listener.local_addr().unwrap().port();
    let client = StreamSocket::connect("127.0.0.1", port, AddressFamily::V4).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

fn ethernet_frame(seq: u8, len: usize) -> Vec<u8> {
    let mut frame = vec![seq; len];
    frame[..6].copy_from_slice(&[0xff; 6]);
    frame[6..12].copy_from_slice(&[0x02, 0, 0, 0, 0, seq]);
    frame[12..14].copy_from_slice(&[0x88, 0xb5]);
    frame
}

#[test]
fn test_frames_cross_the_tunnel_both_ways() {
    init_tracing();
    let (link_a, wire_a) = fake_link("tapA");
    let (link_b, wire_b) = fake_link("tapB");
    let (stream_a, stream_b) = tcp_pair();

    let session_a = Session::start(MTU, Arc::new(link_a), Arc::new(stream_a)).unwrap();
    let session_b = Session::start(MTU, Arc::new(link_b), Arc::new(stream_b)).unwrap();

    let mut buf = vec![0u8; MTU + 1];

    let outbound: Vec<Vec<u8>> = [60, 1514, 64, MTU]
        .iter()
        .enumerate()
        .map(|(i, &len)| ethernet_frame(i as u8, len))
        .collect();
    for frame in &outbound {
        wire_a.send(frame).unwrap();
    }
    for frame in &outbound {
        let n = wire_b.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], &frame[..]);
    }

    let reply = ethernet_frame(0x42, 98);
    wire_b.send(&reply).unwrap();
    let n = wire_a.recv(&mut buf).unwrap();
    assert_eq!(&buf[..n], &reply[..]);

    // Nothing has ended yet
    assert!(!session_a.wait_timeout(Duration::from_millis(50)));

    let summary_a = session_a.shutdown();
    assert_eq!(summary_a.uplink.frames, outbound.len() as u64);
    assert_eq!(summary_a.downlink.frames, 1);

    // A's stream is closed once its session is gone, so B sees end of stream
    assert!(session_b.wait_timeout(Duration::from_secs(5)));
    let summary_b = session_b.shutdown();
    assert_eq!(summary_b.downlink.frames, outbound.len() as u64);
    assert_eq!(
        summary_b.downlink.bytes,
        outbound.iter().map(|f| f.len() as u64).sum::<u64>()
    );
    assert_eq!(summary_b.uplink.frames, 1);
}

#[test]
fn test_link_hangup_ends_both_sessions() {
    init_tracing();
    let (link_a, wire_a) = fake_link("tapA");
    let (link_b, _wire_b) = fake_link("tapB");
    let (stream_a, stream_b) = tcp_pair();

    let session_a = Session::start(MTU, Arc::new(link_a), Arc::new(stream_a)).unwrap();
    let session_b = Session::start(MTU, Arc::new(link_b), Arc::new(stream_b)).unwrap();

    // A zero-length read is an orderly link shutdown
    wire_a.send(&[]).unwrap();

    assert!(session_a.wait_timeout(Duration::from_secs(5)));
    session_a.shutdown();

    assert!(session_b.wait_timeout(Duration::from_secs(5)));
    let summary_b = session_b.shutdown();
    assert_eq!(summary_b.downlink.frames, 0);
}
