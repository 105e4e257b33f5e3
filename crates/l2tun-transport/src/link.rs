//! Raw layer-2 link socket (Linux `AF_PACKET`)

use crate::wait::CancellableWait;
use crate::{close_fd, fd_is_open, TransportError, TransportResult, TunnelSocket};
use std::ffi::CString;
use std::io;
use std::mem;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use tracing::{debug, info, warn};

/// Ethernet header: dst (6) + src (6) + ethertype (2)
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// 802.1Q tag carried between the source address and the ethertype
pub const VLAN_TAG_SIZE: usize = 4;

// linux/if_packet.h
const PACKET_OUTGOING: u8 = 4;
const PACKET_ADD_MEMBERSHIP: libc::c_int = 1;
const PACKET_DROP_MEMBERSHIP: libc::c_int = 2;
const PACKET_MR_PROMISC: libc::c_ushort = 1;

#[repr(C)]
struct PacketMreq {
    mr_ifindex: libc::c_int,
    mr_type: libc::c_ushort,
    mr_alen: libc::c_ushort,
    mr_address: [libc::c_uchar; 8],
}

/// Largest raw frame a link with the given interface MTU can carry
pub fn frame_capacity(interface_mtu: usize) -> usize {
    interface_mtu + ETHERNET_HEADER_SIZE + VLAN_TAG_SIZE
}

/// Owning handle to a raw packet socket bound to one interface.
///
/// Captures and injects every frame type (`ETH_P_ALL`). Frames this host
/// transmits on the interface, including the ones injected through this
/// socket, are not returned by `recv`.
#[derive(Debug)]
pub struct LinkSocket {
    fd: OwnedFd,
    wait: CancellableWait,
    interface: String,
    ifindex: u32,
    mtu: usize,
}

impl LinkSocket {
    /// Open a raw socket on `interface` and discover its MTU
    pub fn open(interface: &str) -> TransportResult<Self> {
        let name = CString::new(interface)
            .map_err(|_| TransportError::InterfaceNotFound(interface.to_string()))?;
        if name.as_bytes().len() >= libc::IFNAMSIZ {
            return Err(TransportError::InterfaceNotFound(interface.to_string()));
        }

        // SAFETY: `name` is a valid NUL-terminated string.
        let ifindex = unsafe { libc::if_nametoindex(name.as_ptr()) };
        if ifindex == 0 {
            return Err(TransportError::InterfaceNotFound(interface.to_string()));
        }

        let protocol = (libc::ETH_P_ALL as u16).to_be();
        // SAFETY: plain socket(2) call.
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_CLOEXEC,
                protocol as libc::c_int,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error().into());
        }
        // SAFETY: `raw` is a new descriptor not owned elsewhere.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut sll: libc::sockaddr_ll = unsafe { mem::zeroed() };
        sll.sll_family = libc::AF_PACKET as libc::c_ushort;
        sll.sll_protocol = protocol;
        sll.sll_ifindex = ifindex as libc::c_int;

        // SAFETY: `sll` outlives the call and the length matches its type.
        let ret = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &sll as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }

        let interface_mtu = query_interface_mtu(&fd, &name)?;
        let mtu = frame_capacity(interface_mtu);
        info!(
            interface,
            ifindex,
            interface_mtu,
            mtu,
            "Opened raw link socket"
        );

        let mut link = Self::from_fd(fd, interface, mtu)?;
        link.ifindex = ifindex;
        Ok(link)
    }

    /// Wrap an already-open packet descriptor.
    ///
    /// `mtu` is the largest frame `recv` will accept and the bound peers'
    /// frames are validated against.
    pub fn from_fd(fd: OwnedFd, interface: impl Into<String>, mtu: usize) -> TransportResult<Self> {
        Ok(Self {
            fd,
            wait: CancellableWait::new()?,
            interface: interface.into(),
            ifindex: 0,
            mtu,
        })
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Receive one frame. Blocks until a frame arrives or `cancel` is called.
    ///
    /// Frames larger than `buf` are dropped with a warning rather than
    /// delivered truncated.
    pub fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        loop {
            self.wait.wait_recv(&self.fd, None)?;

            // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
            let mut from: libc::sockaddr_ll = unsafe { mem::zeroed() };
            let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;

            // SAFETY: `buf` and `from` are valid for writes of the given
            // lengths for the duration of the call.
            let ret = unsafe {
                libc::recvfrom(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    libc::MSG_TRUNC | libc::MSG_DONTWAIT,
                    &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut from_len,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => continue,
                    _ => return Err(err.into()),
                }
            }

            let len = ret as usize;
            if from.sll_family == libc::AF_PACKET as libc::c_ushort
                && from.sll_pkttype == PACKET_OUTGOING
            {
                continue;
            }
            if len > buf.len() {
                warn!(
                    interface = %self.interface,
                    length = len,
                    capacity = buf.len(),
                    "Dropping oversized frame"
                );
                continue;
            }
            return Ok(len);
        }
    }

    /// Inject one frame.
    ///
    /// # Panics
    ///
    /// Panics if the kernel accepts fewer bytes than requested; a raw frame
    /// is never written partially.
    pub fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        let ret = loop {
            // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
            let ret = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    buf.as_ptr() as *const libc::c_void,
                    buf.len(),
                    0,
                )
            };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err.into());
            }
            break ret as usize;
        };

        assert_eq!(ret, buf.len(), "short write on link {}", self.interface);
        Ok(ret)
    }

    pub fn cancel(&self) -> TransportResult<()> {
        self.wait.cancel()
    }

    /// Enable or disable promiscuous reception on the bound interface
    pub fn set_promiscuous(&self, enable: bool) -> TransportResult<()> {
        if self.ifindex == 0 {
            return Err(TransportError::InterfaceNotFound(self.interface.clone()));
        }

        let mreq = PacketMreq {
            mr_ifindex: self.ifindex as libc::c_int,
            mr_type: PACKET_MR_PROMISC,
            mr_alen: 0,
            mr_address: [0; 8],
        };
        let option = if enable {
            PACKET_ADD_MEMBERSHIP
        } else {
            PACKET_DROP_MEMBERSHIP
        };

        // SAFETY: `mreq` is a correctly laid out packet_mreq that outlives
        // the call.
        let ret = unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                libc::SOL_PACKET,
                option,
                &mreq as *const PacketMreq as *const libc::c_void,
                mem::size_of::<PacketMreq>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(io::Error::last_os_error().into());
        }
        debug!(interface = %self.interface, enable, "Set promiscuous mode");
        Ok(())
    }

    /// Close the descriptor, reporting any error `close(2)` returns
    pub fn close(self) -> TransportResult<()> {
        close_fd(self.fd)
    }

    pub fn is_valid(&self) -> bool {
        fd_is_open(self.fd.as_raw_fd())
    }
}

impl AsFd for LinkSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl TunnelSocket for LinkSocket {
    fn recv(&self, buf: &mut [u8]) -> TransportResult<usize> {
        LinkSocket::recv(self, buf)
    }

    fn send(&self, buf: &[u8]) -> TransportResult<usize> {
        LinkSocket::send(self, buf)
    }

    fn cancel(&self) -> TransportResult<()> {
        LinkSocket::cancel(self)
    }
}

fn query_interface_mtu(fd: &OwnedFd, name: &CString) -> TransportResult<usize> {
    // SAFETY: ifreq is plain old data; all-zero is a valid value.
    let mut req: libc::ifreq = unsafe { mem::zeroed() };
    for (dst, src) in req.ifr_name.iter_mut().zip(name.as_bytes_with_nul()) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: SIOCGIFMTU reads ifr_name and writes ifru_mtu of `req`.
    let ret = unsafe {
        libc::ioctl(
            fd.as_raw_fd(),
            libc::SIOCGIFMTU,
            &mut req as *mut libc::ifreq,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error().into());
    }

    // SAFETY: the kernel filled the mtu member of the union.
    let mtu = unsafe { req.ifr_ifru.ifru_mtu };
    Ok(mtu.max(0) as usize)
}
