//! Address family selection and endpoint formatting

use crate::{TransportError, TransportResult};
use std::net::{IpAddr, SocketAddr};

/// Which IP families a connection may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddressFamily {
    /// Build from "allowed" flags. At least one family must be allowed.
    pub fn new(allow_v4: bool, allow_v6: bool) -> TransportResult<Self> {
        match (allow_v4, allow_v6) {
            (true, true) => Ok(AddressFamily::Any),
            (true, false) => Ok(AddressFamily::V4),
            (false, true) => Ok(AddressFamily::V6),
            (false, false) => Err(TransportError::NoAddressFamily),
        }
    }

    /// Build from "-4 only" / "-6 only" command line switches.
    ///
    /// Giving both, or neither, allows either family.
    pub fn from_only_flags(v4_only: bool, v6_only: bool) -> Self {
        match (v4_only, v6_only) {
            (true, false) => AddressFamily::V4,
            (false, true) => AddressFamily::V6,
            _ => AddressFamily::Any,
        }
    }

    pub fn allows_v4(&self) -> bool {
        matches!(self, AddressFamily::Any | AddressFamily::V4)
    }

    pub fn allows_v6(&self) -> bool {
        matches!(self, AddressFamily::Any | AddressFamily::V6)
    }

    pub fn allows(&self, addr: &SocketAddr) -> bool {
        match addr {
            SocketAddr::V4(_) => self.allows_v4(),
            SocketAddr::V6(_) => self.allows_v6(),
        }
    }
}

/// Render an endpoint as `ip:port` for logs.
///
/// IPv4-mapped IPv6 addresses (as seen on a dual-stack listener) are shown
/// in their IPv4 form; other IPv6 addresses are bracketed.
pub fn format_endpoint(addr: &SocketAddr) -> String {
    let ip = match addr.ip() {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    };
    SocketAddr::new(ip, addr.port()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_allowed_flags() {
        assert_eq!(AddressFamily::new(true, true).unwrap(), AddressFamily::Any);
        assert_eq!(AddressFamily::new(true, false).unwrap(), AddressFamily::V4);
        assert_eq!(AddressFamily::new(false, true).unwrap(), AddressFamily::V6);
        assert!(matches!(
            AddressFamily::new(false, false),
            Err(TransportError::NoAddressFamily)
        ));
    }

    #[test]
    fn test_family_from_only_flags() {
        assert_eq!(AddressFamily::from_only_flags(false, false), AddressFamily::Any);
        assert_eq!(AddressFamily::from_only_flags(true, true), AddressFamily::Any);
        assert_eq!(AddressFamily::from_only_flags(true, false), AddressFamily::V4);
        assert_eq!(AddressFamily::from_only_flags(false, true), AddressFamily::V6);
    }

    #[test]
    fn test_family_filters_addresses() {
        let v4: SocketAddr = "10.0.0.1:80".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:80".parse().unwrap();

        assert!(AddressFamily::V4.allows(&v4));
        assert!(!AddressFamily::V4.allows(&v6));
        assert!(AddressFamily::V6.allows(&v6));
        assert!(!AddressFamily::V6.allows(&v4));
        assert!(AddressFamily::Any.allows(&v4) && AddressFamily::Any.allows(&v6));
    }

    #[test]
    fn test_format_endpoint() {
        let v4: SocketAddr = "192.168.1.7:4000".parse().unwrap();
        let mapped: SocketAddr = "[::ffff:192.168.1.7]:4000".parse().unwrap();
        let v6: SocketAddr = "[2001:db8::1]:4000".parse().unwrap();

        assert_eq!(format_endpoint(&v4), "192.168.1.7:4000");
        assert_eq!(format_endpoint(&mapped), "192.168.1.7:4000");
        assert_eq!(format_endpoint(&v6), "[2001:db8::1]:4000");
    }
}
