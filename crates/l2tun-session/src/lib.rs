//! Tunnel session: the two worker loops and their shared lifecycle
//!
//! ```text
//!              ┌──────────── uplink ────────────┐
//! LinkSocket ──┤ recv frame → prepend header    ├──→ StreamSocket
//!              └────────────────────────────────┘
//!              ┌─────────── downlink ───────────┐
//! LinkSocket ←─┤ reassemble → strip header      ├─── StreamSocket
//!              └────────────────────────────────┘
//! ```
//!
//! Each direction runs on its own thread and blocks in its socket's `recv`.
//! Whichever worker exits first releases the session's [`Completion`]; the
//! controller then cancels both sockets and joins both threads.

pub mod completion;
pub mod downlink;
pub mod reassembly;
pub mod session;
pub mod stats;
pub mod uplink;

#[cfg(test)]
mod mock;

pub use completion::Completion;
pub use reassembly::ReassemblyBuffer;
pub use session::{Session, SessionSummary};
pub use stats::{TrafficCounter, TrafficSnapshot};

use l2tun_proto::ProtoError;
use l2tun_transport::TransportError;
use thiserror::Error;
use tracing::{debug, error, info};

/// Reasons a worker loop ends other than orderly shutdown
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Protocol violation: {0}")]
    Protocol(#[from] ProtoError),

    #[error("Connection closed inside a frame ({pending} bytes pending)")]
    TruncatedStream { pending: usize },
}

impl WorkerError {
    /// True if the worker was stopped on purpose by `cancel()`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, WorkerError::Transport(e) if e.is_cancelled())
    }
}

/// Releases the completion signal when the worker exits, including by panic
struct ReleaseOnExit<'a>(&'a Completion);

impl Drop for ReleaseOnExit<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}

fn log_exit(direction: &'static str, result: &Result<(), WorkerError>) {
    match result {
        Ok(()) => info!(direction, "Worker finished"),
        Err(e) if e.is_cancellation() => debug!(direction, "Worker cancelled"),
        Err(e) => error!(direction, error = %e, "Worker failed"),
    }
}
