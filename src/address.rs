//! Network endpoint value type.
//!
//! Mirrors `struct _Address` from the original sngrep implementation
//! (`storage/address.h`): an IP string paired with a port, compared either
//! with or without the port.

use std::fmt;
use std::net::IpAddr;

/// A network endpoint: an IP address plus a port.
///
/// Addresses are plain values — copied, not reference-counted. Two flavors
/// of equality are available: [`Address::eq_with_port`] (the default
/// `PartialEq` impl) and [`Address::eq_ignore_port`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    ip: IpAddr,
    port: u16,
}

impl Address {
    /// Build a new address.
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// The IP address.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Compare two addresses including their ports.
    pub fn eq_with_port(&self, other: &Address) -> bool {
        self == other
    }

    /// Compare two addresses ignoring their ports.
    pub fn eq_ignore_port(&self, other: &Address) -> bool {
        self.ip == other.ip
    }

    /// Return a copy of this address with the port zeroed out, matching
    /// `address_strip_port` in the original implementation.
    pub fn strip_port(&self) -> Address {
        Address {
            ip: self.ip,
            port: 0,
        }
    }

    /// Parse an `ip:port` string into an address.
    pub fn from_str_ipport(s: &str) -> Option<Address> {
        let (ip_str, port_str) = s.rsplit_once(':')?;
        let ip: IpAddr = ip_str.parse().ok()?;
        let port: u16 = port_str.parse().ok()?;
        Some(Address::new(ip, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_port_equality() {
        let a = Address::new("10.0.0.1".parse().unwrap(), 5060);
        let b = Address::new("10.0.0.1".parse().unwrap(), 5060);
        let c = Address::new("10.0.0.1".parse().unwrap(), 5061);
        assert!(a.eq_with_port(&b));
        assert!(!a.eq_with_port(&c));
    }

    #[test]
    fn ignore_port_equality() {
        let a = Address::new("10.0.0.1".parse().unwrap(), 5060);
        let c = Address::new("10.0.0.1".parse().unwrap(), 5061);
        assert!(a.eq_ignore_port(&c));
    }

    #[test]
    fn strip_port_zeroes_it() {
        let a = Address::new("10.0.0.1".parse().unwrap(), 5060);
        assert_eq!(a.strip_port().port(), 0);
    }

    #[test]
    fn from_str_ipport_parses() {
        let a = Address::from_str_ipport("192.168.1.1:40000").unwrap();
        assert_eq!(a.port(), 40000);
    }

    #[test]
    fn from_str_ipport_rejects_garbage() {
        assert!(Address::from_str_ipport("not-an-address").is_none());
    }
}
