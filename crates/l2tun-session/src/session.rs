//! Session lifecycle: start both workers, wait for the first to finish,
//! tear down.

use crate::completion::Completion;
use crate::stats::{TrafficCounter, TrafficSnapshot};
use crate::{downlink, uplink, WorkerError};
use l2tun_transport::TunnelSocket;
use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

type Worker = JoinHandle<Result<(), WorkerError>>;

/// Traffic forwarded by a session, per direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// Link → stream
    pub uplink: TrafficSnapshot,
    /// Stream → link
    pub downlink: TrafficSnapshot,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "uplink {} frames / {} bytes, downlink {} frames / {} bytes",
            self.uplink.frames, self.uplink.bytes, self.downlink.frames, self.downlink.bytes
        )
    }
}

/// One tunnel between a link socket and a connected stream socket.
///
/// `start` spawns the uplink and downlink workers. The session ends when
/// either worker ends; `shutdown` then cancels both sockets so the other
/// worker unblocks, and joins both threads. Dropping a session without
/// calling `shutdown` performs the same teardown.
pub struct Session<L, S>
where
    L: TunnelSocket + 'static,
    S: TunnelSocket + 'static,
{
    link: Arc<L>,
    stream: Arc<S>,
    completion: Arc<Completion>,
    uplink_stats: Arc<TrafficCounter>,
    downlink_stats: Arc<TrafficCounter>,
    uplink: Option<Worker>,
    downlink: Option<Worker>,
}

impl<L, S> Session<L, S>
where
    L: TunnelSocket + 'static,
    S: TunnelSocket + 'static,
{
    /// Spawn both workers. `mtu` is the largest link frame either direction
    /// will carry.
    pub fn start(mtu: usize, link: Arc<L>, stream: Arc<S>) -> io::Result<Self> {
        let completion = Arc::new(Completion::new());
        let uplink_stats = Arc::new(TrafficCounter::new());
        let downlink_stats = Arc::new(TrafficCounter::new());

        let mut session = Self {
            link,
            stream,
            completion,
            uplink_stats,
            downlink_stats,
            uplink: None,
            downlink: None,
        };

        let stats = session.uplink_stats.clone();
        session.uplink = Some(session.spawn("l2tun-uplink", mtu, stats, uplink::run)?);
        let stats = session.downlink_stats.clone();
        session.downlink = Some(session.spawn("l2tun-downlink", mtu, stats, downlink::run)?);

        info!(mtu, "Session started");
        Ok(session)
    }

    fn spawn(
        &self,
        name: &str,
        mtu: usize,
        stats: Arc<TrafficCounter>,
        worker: fn(usize, &L, &S, &Completion, &TrafficCounter) -> Result<(), WorkerError>,
    ) -> io::Result<Worker> {
        let link = self.link.clone();
        let stream = self.stream.clone();
        let completion = self.completion.clone();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker(mtu, &link, &stream, &completion, &stats))
    }

    /// Block until at least one worker has finished
    pub fn await_either(&self) {
        self.completion.acquire();
    }

    /// Like `await_either`, but gives up after `timeout`. Returns whether a
    /// worker finished.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.completion.acquire_timeout(timeout)
    }

    /// Counters so far
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            uplink: self.uplink_stats.snapshot(),
            downlink: self.downlink_stats.snapshot(),
        }
    }

    /// Cancel both sockets, join both workers and report what was forwarded
    pub fn shutdown(mut self) -> SessionSummary {
        self.teardown();
        self.summary()
    }

    fn teardown(&mut self) {
        if self.uplink.is_none() && self.downlink.is_none() {
            return;
        }

        if let Err(e) = self.link.cancel() {
            warn!(error = %e, "Failed to cancel link socket");
        }
        if let Err(e) = self.stream.cancel() {
            warn!(error = %e, "Failed to cancel stream socket");
        }

        for handle in [self.uplink.take(), self.downlink.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            match handle.join() {
                Ok(_) => debug!(worker = %name, "Joined"),
                Err(_) => error!(worker = %name, "Worker panicked"),
            }
        }
        debug!("Session torn down");
    }
}

impl<L, S> Drop for Session<L, S>
where
    L: TunnelSocket + 'static,
    S: TunnelSocket + 'static,
{
    fn drop(&mut self) {
        self.teardown();
    }
}
