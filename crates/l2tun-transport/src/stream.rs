//! TCP stream socket carrying the tunnel

use crate::addr::AddressFamily;
use crate::wait::CancellableWait;
use crate::{close_fd, fd_is_open, TransportError, TransportResult, TunnelSocket};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};
use std::time::Duration;
use tracing::debug;

/// Owning handle to a TCP socket, either listening or connected.
///
/// The descriptor runs non-blocking; every operation that would block
/// waits in a [`CancellableWait`] instead, so `cancel` interrupts blocked
/// receives, sends and accepts alike.
#[derive(Debug)]
pub struct StreamSocket {
    inner: Socket,
    wait: CancellableWait,
}

impl StreamSocket {
    fn from_socket(inner: Socket) -> TransportResult<Self> {
        inner.set_nonblocking(true)?;
        Ok(Self {
            inner,
            wait: CancellableWait::new()?,
        })
    }

    fn connected(inner: Socket) -> TransportResult<Self> {
        inner.set_nodelay(true)?;
        Self::from_socket(inner)
    }

    /// Resolve `host` and connect to the first address of an allowed family
    /// that accepts the connection.
    pub fn connect(host: &str, port: u16, family: AddressFamily) -> TransportResult<Self> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        for addr in addrs.filter(|a| family.allows(a)) {
            let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
            match socket.connect(&SockAddr::from(addr)) {
                Ok(()) => {
                    debug!(%addr, "Connected");
                    return Self::connected(socket);
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                }
            }
        }

        Err(TransportError::ConnectFailed(host.to_string()))
    }

    /// Listen on the wildcard address.
    ///
    /// `Any` binds a dual-stack IPv6 socket; `V6` sets `IPV6_V6ONLY`; `V4`
    /// binds an IPv4 socket.
    pub fn listen(port: u16, backlog: i32, family: AddressFamily) -> TransportResult<Self> {
        let (domain, addr) = if family.allows_v6() {
            (
                Domain::IPV6,
                SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)),
            )
        } else {
            (
                Domain::IPV4,
                SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)),
            )
        };

        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        if domain == Domain::IPV6 {
            socket.set_only_v6(!family.allows_v4())?;
        }
        socket.bind(&SockAddr::from(addr))?;
        socket.listen(backlog)?;
        debug!(%addr, backlog, ?family, "Listening");

        Self::from_socket(socket)
    }

    /// Accept one connection. Blocks until a peer connects or `cancel` is
    /// called.
    pub fn accept(&self) -> TransportResult<(StreamSocket, SocketAddr)> {
        loop {
            self.wait.wait_recv(&self.inner, None)?;
            if let Some(accepted) = self.try_accept()? {
                return Ok(accepted);
            }
        }
    }

    /// Accept with a bounded wait. Returns `Ok(None)` if no peer connected
    /// within `timeout`.
    pub fn accept_timeout(
        &self,
        timeout: Duration,
    ) -> TransportResult<Option<(StreamSocket, SocketAddr)>> {
        if !self.wait.wait_recv(&self.inner, Some(timeout))? {
            return Ok(None);
        }
        self.try_accept()
    }

    fn try_accept(&self) -> TransportResult<Option<(StreamSocket, SocketAddr)>> {
        match self.inner.accept() {
            Ok((socket, addr)) => {
                let peer = addr.as_socket().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, "peer is not an IP endpoint")
                })?;
                Ok(Some((Self::connected(socket)?, peer)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Receive up to `buf.len()` bytes. `Ok(0)` means the peer closed the
    /// connection.
    ///
    /// A hangup seen while waiting fails with `ConnectionReset`; a failed
    /// read keeps its OS error as `Io`, which `is_connection_reset` still
    /// reports as a reset.
    pub fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        loop {
            self.wait.wait_recv(&self.inner, None)?;
            match (&self.inner).read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send all of `buf`, waiting for buffer space as needed.
    ///
    /// A vanished peer is reported as an error, never as `SIGPIPE`.
    pub fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        let mut written = 0;
        while written < buf.len() {
            match self.inner.send_with_flags(&buf[written..], libc::MSG_NOSIGNAL) {
                Ok(0) => return Err(TransportError::ConnectionReset),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.wait.wait_send(&self.inner, None)?;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    pub fn cancel(&self) -> TransportResult<()> {
        self.wait.cancel()
    }

    /// Local endpoint (`getsockname`)
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        socket_addr(self.inner.local_addr()?)
    }

    /// Remote endpoint (`getpeername`)
    pub fn peer_addr(&self) -> TransportResult<SocketAddr> {
        socket_addr(self.inner.peer_addr()?)
    }

    /// Shut the connection down and close the descriptor
    pub fn close(self) -> TransportResult<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(e.into()),
        }
        close_fd(self.inner)
    }

    pub fn is_valid(&self) -> bool {
        fd_is_open(self.inner.as_raw_fd())
    }
}

fn socket_addr(addr: SockAddr) -> TransportResult<SocketAddr> {
    addr.as_socket().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "not an IP endpoint").into()
    })
}

impl AsFd for StreamSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl TunnelSocket for StreamSocket {
    fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        StreamSocket::recv(self, buf)
    }

    fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        StreamSocket::send(self, buf)
    }

    fn cancel(&self) -> TransportResult<()> {
        StreamSocket::cancel(self)
    }
}
