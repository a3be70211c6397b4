//! IP authority with subnet-aware equality.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// A host-level identifier: ip + port, optionally a CIDR subnet.
///
/// Equality treats a zero port as a wildcard and a non-zero CIDR as a
/// subnet identifier: a subnet equals any authority its prefix contains,
/// while two distinct subnets are never equal even if they intersect.
/// Because this equality is not a congruence it deliberately does not
/// implement `Hash`; authority lists are scanned linearly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Authority {
    ip: IpAddr,
    port: u16,
    cidr: u8,
}

impl Authority {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip: unmap(ip), port, cidr: 0 }
    }

    pub fn with_cidr(ip: IpAddr, port: u16, cidr: u8) -> Self {
        Self { ip: unmap(ip), port, cidr }
    }

    /// The any-address authority for a local bind.
    pub fn unspecified(port: u16) -> Self {
        Self { ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port, cidr: 0 }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn cidr(&self) -> u8 {
        self.cidr
    }

    /// Port non-zero and ip non-zero.
    pub fn is_specified(&self) -> bool {
        self.port != 0 && !self.ip.is_unspecified()
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    /// Subnet-aware match, the equality of the type spelled as a method
    /// for list-membership call sites.
    pub fn matches(&self, other: &Authority) -> bool {
        self == other
    }
}

impl From<SocketAddr> for Authority {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

impl PartialEq for Authority {
    fn eq(&self, other: &Self) -> bool {
        if self.port != 0 && other.port != 0 && self.port != other.port {
            return false;
        }
        match (self.cidr, other.cidr) {
            (0, 0) => self.ip == other.ip,
            (0, _) => contains(other.ip, other.cidr, self.ip),
            (_, 0) => contains(self.ip, self.cidr, other.ip),
            // Subnet identifiers: equal only when identical.
            (_, _) => {
                self.cidr == other.cidr && contains(self.ip, self.cidr, other.ip)
            }
        }
    }
}

impl Eq for Authority {}

/// True if `ip` lies within the `prefix/cidr` subnet. Mixed families never
/// contain one another.
fn contains(prefix: IpAddr, cidr: u8, ip: IpAddr) -> bool {
    match (prefix, ip) {
        (IpAddr::V4(prefix), IpAddr::V4(ip)) => {
            if cidr > 32 {
                return false;
            }
            let mask = if cidr == 0 { 0 } else { u32::MAX << (32 - u32::from(cidr)) };
            (u32::from(prefix) & mask) == (u32::from(ip) & mask)
        }
        (IpAddr::V6(prefix), IpAddr::V6(ip)) => {
            if cidr > 128 {
                return false;
            }
            let mask = if cidr == 0 { 0 } else { u128::MAX << (128 - u32::from(cidr)) };
            (u128::from(prefix) & mask) == (u128::from(ip) & mask)
        }
        _ => false,
    }
}

/// Collapse an ipv4-mapped ipv6 address to its ipv4 form.
fn unmap(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
        v4 => v4,
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            IpAddr::V4(ip) => write!(f, "{}:{}", ip, self.port)?,
            IpAddr::V6(ip) => write!(f, "[{}]:{}", ip, self.port)?,
        }
        if self.cidr != 0 {
            write!(f, "/{}", self.cidr)?;
        }
        Ok(())
    }
}

impl FromStr for Authority {
    type Err = AuthorityParseError;

    /// `ip:port`, `[ipv6]:port`, optionally `/cidr`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (address, cidr) = match text.split_once('/') {
            Some((address, cidr)) => {
                let cidr = cidr.parse::<u8>().map_err(|_| AuthorityParseError(text.into()))?;
                (address, cidr)
            }
            None => (text, 0),
        };

        let socket = address
            .parse::<SocketAddr>()
            .map_err(|_| AuthorityParseError(text.into()))?;

        let limit = match socket.ip() {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if cidr > limit {
            return Err(AuthorityParseError(text.into()));
        }

        Ok(Self::with_cidr(socket.ip(), socket.port(), cidr))
    }
}

impl TryFrom<String> for Authority {
    type Error = AuthorityParseError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        text.parse()
    }
}

impl From<Authority> for String {
    fn from(authority: Authority) -> Self {
        authority.to_string()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid authority: {0}")]
pub struct AuthorityParseError(String);
