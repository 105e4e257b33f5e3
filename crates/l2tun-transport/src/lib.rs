//! Blocking socket layer for the layer-2 tunnel
//!
//! This crate provides the two socket handles a tunnel session moves data
//! between, plus the wait primitive that makes their blocking calls
//! cancellable from another thread.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐            ┌──────────────────────┐
//! │      LinkSocket      │            │     StreamSocket     │
//! │ AF_PACKET / ETH_P_ALL│            │   TCP (v4 and/or v6) │
//! └──────────┬───────────┘            └──────────┬───────────┘
//!            │ recv / send                       │ recv / send
//!            ↓                                   ↓
//! ┌─────────────────────────────────────────────────────────┐
//! │                    CancellableWait                       │
//! │      poll(socket fd, cancel eventfd) in one call         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every blocking receive first waits in [`CancellableWait`], so a call to
//! [`TunnelSocket::cancel`] from any thread wakes the worker blocked on that
//! socket with [`TransportError::Cancelled`].

pub mod addr;
pub mod link;
pub mod stream;
pub mod wait;

pub use addr::{format_endpoint, AddressFamily};
pub use link::LinkSocket;
pub use stream::StreamSocket;
pub use wait::{CancellableWait, Readiness};

use std::io;
use std::os::fd::{IntoRawFd, RawFd};
use thiserror::Error;

/// Transport-level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Connection reset by peer")]
    ConnectionReset,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to resolve {host}: {reason}")]
    Resolve { host: String, reason: String },

    #[error("Could not connect to {0}")]
    ConnectFailed(String),

    #[error("Network interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("Neither IPv4 nor IPv6 is allowed")]
    NoAddressFamily,
}

impl TransportError {
    /// True if this error was raised by an intentional `cancel()`
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }

    /// True if the peer (or the link) went away underneath us
    pub fn is_connection_reset(&self) -> bool {
        match self {
            TransportError::ConnectionReset => true,
            TransportError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// A blocking, cancellable socket as seen by the tunnel workers.
///
/// Implementations are shared between two threads: one only calls `recv`,
/// the other only calls `send`. `cancel` may be called from any thread.
pub trait TunnelSocket: Send + Sync {
    /// Receive up to `buf.len()` bytes.
    ///
    /// Blocks until data is available. Returns `Ok(0)` on orderly shutdown,
    /// `Err(Cancelled)` if woken by `cancel`.
    fn recv(&self, buf: &mut [u8]) -> TransportResult<usize>;

    /// Send all of `buf`. Either the whole buffer is written or an error is
    /// returned.
    fn send(&self, buf: &[u8]) -> TransportResult<usize>;

    /// Wake any blocked `recv` and fail all later waits on this socket.
    ///
    /// Idempotent; safe with no waiter pending.
    fn cancel(&self) -> TransportResult<()>;
}

/// Check whether a descriptor still refers to an open file
pub(crate) fn fd_is_open(fd: RawFd) -> bool {
    // SAFETY: F_GETFD only inspects the descriptor table.
    unsafe { libc::fcntl(fd, libc::F_GETFD) != -1 }
}

/// Close a descriptor and report the result, unlike `Drop` for `OwnedFd`
pub(crate) fn close_fd<F: IntoRawFd>(fd: F) -> TransportResult<()> {
    let raw = fd.into_raw_fd();
    // SAFETY: `raw` was just released by its owner and is closed exactly once.
    if unsafe { libc::close(raw) } != 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(())
}
