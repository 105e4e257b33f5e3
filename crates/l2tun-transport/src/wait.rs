//! Cancellable readiness wait
//!
//! Multiplexes a socket and a private `eventfd` in a single `poll(2)` call,
//! so "data arrived" and "cancel requested" are observed atomically by the
//! blocked thread.

use crate::{TransportError, TransportResult};
use std::io;
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::time::{Duration, Instant};
use tracing::trace;

/// Result of a wait that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Readiness {
    pub recv: bool,
    pub send: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.recv || self.send
    }
}

/// Blocking wait on one socket that another thread can interrupt.
///
/// Cancellation is level-triggered: after `cancel()` every later `wait`
/// fails with [`TransportError::Cancelled`] until the owner is replaced.
#[derive(Debug)]
pub struct CancellableWait {
    cancel: OwnedFd,
}

impl CancellableWait {
    pub fn new() -> TransportResult<Self> {
        // SAFETY: eventfd has no memory-safety preconditions.
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `fd` is a freshly created descriptor owned by nobody else.
        let cancel = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { cancel })
    }

    /// Block until `socket` is ready for the requested direction(s), the
    /// wait is cancelled, or `timeout` elapses (`None` waits forever).
    ///
    /// A timeout returns a not-ready [`Readiness`]. Hangup or error on the
    /// socket fails with [`TransportError::ConnectionReset`].
    pub fn wait<S: AsFd>(
        &self,
        socket: &S,
        want_recv: bool,
        want_send: bool,
        timeout: Option<Duration>,
    ) -> TransportResult<Readiness> {
        let mut events: libc::c_short = 0;
        if want_recv {
            events |= libc::POLLIN;
        }
        if want_send {
            events |= libc::POLLOUT;
        }

        let mut fds = [
            libc::pollfd {
                fd: self.cancel.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: socket.as_fd().as_raw_fd(),
                events,
                revents: 0,
            },
        ];

        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let timeout_ms = match deadline {
                None => -1,
                Some(deadline) => {
                    poll_timeout_ms(deadline.saturating_duration_since(Instant::now()))
                }
            };

            // SAFETY: `fds` is a valid array of two pollfd structs for the
            // duration of the call.
            let ret =
                unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }

            if ret == 0 {
                // Only a finite timeout can get here.
                assert!(timeout.is_some(), "poll returned 0 without a timeout");
                return Ok(Readiness::default());
            }
            break;
        }

        let [cancel, sock] = fds;
        assert_eq!(
            cancel.revents & !libc::POLLIN,
            0,
            "unexpected events on cancel eventfd"
        );

        if cancel.revents & libc::POLLIN != 0 {
            trace!("wait cancelled");
            return Err(TransportError::Cancelled);
        }

        if sock.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            return Err(TransportError::ConnectionReset);
        }

        Ok(Readiness {
            recv: sock.revents & libc::POLLIN != 0,
            send: sock.revents & libc::POLLOUT != 0,
        })
    }

    pub fn wait_recv<S: AsFd>(
        &self,
        socket: &S,
        timeout: Option<Duration>,
    ) -> TransportResult<bool> {
        Ok(self.wait(socket, true, false, timeout)?.recv)
    }

    pub fn wait_send<S: AsFd>(
        &self,
        socket: &S,
        timeout: Option<Duration>,
    ) -> TransportResult<bool> {
        Ok(self.wait(socket, false, true, timeout)?.send)
    }

    /// Request cancellation. Safe from any thread, any number of times.
    pub fn cancel(&self) -> TransportResult<()> {
        let one: u64 = 1;
        // SAFETY: writes exactly 8 bytes from a live u64 to an eventfd.
        let ret = unsafe {
            libc::write(
                self.cancel.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if ret < 0 {
            let err = io::Error::last_os_error();
            // Counter saturated: already cancelled many times over.
            if err.kind() == io::ErrorKind::WouldBlock {
                return Ok(());
            }
            return Err(err.into());
        }
        assert_eq!(ret as usize, std::mem::size_of::<u64>(), "short eventfd write");
        Ok(())
    }

    /// Non-blocking check of the cancel flag
    pub fn is_cancelled(&self) -> bool {
        let mut fd = libc::pollfd {
            fd: self.cancel.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: single valid pollfd, zero timeout.
        let ret = unsafe { libc::poll(&mut fd, 1, 0) };
        ret > 0 && fd.revents & libc::POLLIN != 0
    }
}

/// Round up so a sub-millisecond remainder does not turn into a busy poll
fn poll_timeout_ms(remaining: Duration) -> libc::c_int {
    let mut ms = remaining.as_millis();
    if remaining.subsec_nanos() % 1_000_000 != 0 {
        ms += 1;
    }
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_timeout_returns_not_ready() {
        let (a, _b) = UnixStream::pair().unwrap();
        let wait = CancellableWait::new().unwrap();

        let ready = wait.wait(&a, true, false, Some(Duration::from_millis(20))).unwrap();
        assert!(!ready.is_ready());
    }

    #[test]
    fn test_data_makes_socket_readable() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let wait = CancellableWait::new().unwrap();

        b.write_all(b"x").unwrap();
        assert!(wait.wait_recv(&a, None).unwrap());
    }

    #[test]
    fn test_writable_socket_reports_send() {
        let (a, _b) = UnixStream::pair().unwrap();
        let wait = CancellableWait::new().unwrap();

        let ready = wait.wait(&a, false, true, None).unwrap();
        assert_eq!(ready, Readiness { recv: false, send: true });
    }

    #[test]
    fn test_cancel_wakes_blocked_wait() {
        let (a, _b) = UnixStream::pair().unwrap();
        let wait = Arc::new(CancellableWait::new().unwrap());

        let waiter = {
            let wait = wait.clone();
            thread::spawn(move || wait.wait_recv(&a, None))
        };

        thread::sleep(Duration::from_millis(50));
        wait.cancel().unwrap();

        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(TransportError::Cancelled)));
    }

    #[test]
    fn test_cancel_is_level_triggered_and_idempotent() {
        let (a, _b) = UnixStream::pair().unwrap();
        let wait = CancellableWait::new().unwrap();
        assert!(!wait.is_cancelled());

        wait.cancel().unwrap();
        wait.cancel().unwrap();
        assert!(wait.is_cancelled());

        for _ in 0..3 {
            assert!(matches!(
                wait.wait_recv(&a, Some(Duration::from_millis(10))),
                Err(TransportError::Cancelled)
            ));
        }
    }

    #[test]
    fn test_peer_hangup_is_connection_reset() {
        let (a, b) = UnixStream::pair().unwrap();
        let wait = CancellableWait::new().unwrap();

        drop(b);
        let result = wait.wait_recv(&a, None);
        assert!(matches!(result, Err(TransportError::ConnectionReset)));
    }

    #[test]
    fn test_poll_timeout_rounds_up() {
        assert_eq!(poll_timeout_ms(Duration::ZERO), 0);
        assert_eq!(poll_timeout_ms(Duration::from_micros(10)), 1);
        assert_eq!(poll_timeout_ms(Duration::from_millis(5)), 5);
        assert_eq!(poll_timeout_ms(Duration::from_secs(u64::MAX)), libc::c_int::MAX);
    }
}
