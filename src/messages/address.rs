//! Address records and the address-exchange payloads.

use crate::config::Authority;
use crate::error::Error;
use crate::messages::codec::{self, Reader};
use bytes::BufMut;
use std::hash::{Hash, Hasher};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Service bits advertised in version and address messages.
pub mod service {
    /// Serves the full chain.
    pub const NETWORK: u64 = 1;
    /// Answers UTXO queries.
    pub const UTXO: u64 = 1 << 1;
    /// Accepts bloom filters.
    pub const BLOOM: u64 = 1 << 2;
    /// Serves witness data.
    pub const WITNESS: u64 = 1 << 3;
    /// Serves compact filters.
    pub const COMPACT_FILTERS: u64 = 1 << 6;
    /// Serves only recent blocks.
    pub const NETWORK_LIMITED: u64 = 1 << 10;
}

/// Most addresses allowed in a single `addr` payload.
pub const MAX_ADDRESSES: usize = 1_000;

/// A peer address as carried on the wire: when and what it served, where.
///
/// Identity is `(ip, port)`; timestamp and services are advisory and
/// excluded from equality and hashing so the pool deduplicates correctly.
#[derive(Debug, Clone)]
pub struct AddressItem {
    /// Unix seconds, self-reported and untrusted.
    pub timestamp: u32,
    pub services: u64,
    /// 16-byte ipv6 form, ipv4-mapped where applicable.
    pub ip: [u8; 16],
    pub port: u16,
}

impl AddressItem {
    pub fn new(authority: &Authority, timestamp: u32, services: u64) -> Self {
        let ip = match authority.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        };
        Self { timestamp, services, ip, port: authority.port() }
    }

    /// Port non-zero and ip non-zero.
    pub fn is_specified(&self) -> bool {
        self.port != 0 && self.ip != [0u8; 16]
    }

    pub fn ip_addr(&self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.ip);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }

    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip_addr(), self.port)
    }

    pub fn to_authority(&self) -> Authority {
        Authority::new(self.ip_addr(), self.port)
    }

    /// Serialized size with or without the timestamp field.
    pub const fn size(with_timestamp: bool) -> usize {
        if with_timestamp { 30 } else { 26 }
    }

    /// Timestamp is included from protocol 31402; the version payload
    /// embeds address items without it at any protocol level. Port is the
    /// single big-endian field of the wire format.
    pub fn serialize(&self, sink: &mut impl BufMut, with_timestamp: bool) {
        if with_timestamp {
            sink.put_u32_le(self.timestamp);
        }
        sink.put_u64_le(self.services);
        sink.put_slice(&self.ip);
        sink.put_u16(self.port);
    }

    pub fn deserialize(reader: &mut Reader<'_>, with_timestamp: bool) -> Result<Self, Error> {
        let timestamp = if with_timestamp { reader.read_u32_le()? } else { 0 };
        let services = reader.read_u64_le()?;
        let ip = reader.read_array::<16>()?;
        let port = reader.read_u16_be()?;
        Ok(Self { timestamp, services, ip, port })
    }
}

impl PartialEq for AddressItem {
    fn eq(&self, other: &Self) -> bool {
        self.ip == other.ip && self.port == other.port
    }
}

impl Eq for AddressItem {}

impl Hash for AddressItem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ip.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for AddressItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.to_authority().fmt(f)
    }
}

/// The `addr` payload: a counted list of address records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Address {
    pub addresses: Vec<AddressItem>,
}

impl Address {
    pub const COMMAND: &'static str = "addr";

    pub fn serialize(&self, sink: &mut impl BufMut, version: u32) {
        let with_timestamp = version >= crate::messages::level::ADDRESS_TIME;
        codec::write_varint(sink, self.addresses.len() as u64);
        for item in &self.addresses {
            item.serialize(sink, with_timestamp);
        }
    }

    pub fn deserialize(reader: &mut Reader<'_>, version: u32) -> Result<Self, Error> {
        let with_timestamp = version >= crate::messages::level::ADDRESS_TIME;
        let count = reader.read_varint()?;
        let count = usize::try_from(count).map_err(|_| Error::InvalidMessage)?;
        if count > MAX_ADDRESSES {
            return Err(Error::InvalidMessage);
        }
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            addresses.push(AddressItem::deserialize(reader, with_timestamp)?);
        }
        Ok(Self { addresses })
    }
}

/// The `getaddr` solicitation; empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GetAddress;

impl GetAddress {
    pub const COMMAND: &'static str = "getaddr";
}
