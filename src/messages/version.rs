//! Handshake payloads.

use crate::error::Error;
use crate::messages::address::AddressItem;
use crate::messages::codec::{self, Reader};
use crate::messages::level;
use bytes::BufMut;

/// Longest accepted user agent.
pub const MAX_USER_AGENT: usize = 256;

/// The `version` payload. The embedded address items never carry
/// timestamps; `nonce`, `user_agent` and `start_height` date from protocol
/// 106 and are always emitted; `relay` only from 70001.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    /// How we see the peer.
    pub address_receiver: AddressItem,
    /// How the peer sees itself.
    pub address_sender: AddressItem,
    /// Loopback detection; never zero on emission.
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl Version {
    pub const COMMAND: &'static str = "version";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        sink.put_u32_le(self.version);
        sink.put_u64_le(self.services);
        sink.put_i64_le(self.timestamp);
        self.address_receiver.serialize(sink, false);
        self.address_sender.serialize(sink, false);
        sink.put_u64_le(self.nonce);
        codec::write_varstr(sink, &self.user_agent);
        sink.put_i32_le(self.start_height);
        if self.version >= level::RELAY {
            sink.put_u8(u8::from(self.relay));
        }
    }

    /// Tolerant of ancient short forms: fields after the sender address are
    /// read only while bytes remain, and a missing relay flag means relay.
    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let version = reader.read_u32_le()?;
        let services = reader.read_u64_le()?;
        let timestamp = reader.read_i64_le()?;
        let address_receiver = AddressItem::deserialize(reader, false)?;
        let address_sender = AddressItem::deserialize(reader, false)?;

        let mut message = Self {
            version,
            services,
            timestamp,
            address_receiver,
            address_sender,
            nonce: 0,
            user_agent: String::new(),
            start_height: 0,
            relay: true,
        };

        if reader.is_exhausted() {
            return Ok(message);
        }
        message.nonce = reader.read_u64_le()?;
        message.user_agent = reader.read_varstr(MAX_USER_AGENT)?;
        message.start_height = reader.read_i32_le()?;

        if version >= level::RELAY && !reader.is_exhausted() {
            message.relay = reader.read_u8()? != 0;
        }
        Ok(message)
    }
}

/// The `verack` acknowledgement; empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Verack;

impl Verack {
    pub const COMMAND: &'static str = "verack";
}

/// The `sendaddrv2` capability announcement (70016); empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendAddressV2;

impl SendAddressV2 {
    pub const COMMAND: &'static str = "sendaddrv2";
}

/// The `wtxidrelay` capability announcement (70016); empty payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WitnessTxIdRelay;

impl WitnessTxIdRelay {
    pub const COMMAND: &'static str = "wtxidrelay";
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::address::service;

    fn sample(version: u32) -> Version {
        let authority = "1.2.3.4:8333".parse().unwrap();
        Version {
            version,
            services: service::NETWORK | service::WITNESS,
            timestamp: 1_700_000_000,
            address_receiver: AddressItem::new(&authority, 0, service::NETWORK),
            address_sender: AddressItem::new(&"0.0.0.0:0".parse().unwrap(), 0, 0),
            nonce: 0xa5a5_a5a5_a5a5_a5a5,
            user_agent: "/sierra:0.3.0/".into(),
            start_height: 0,
            relay: true,
        }
    }

    #[test]
    fn test_round_trip_70016() {
        let message = sample(70016);
        let mut sink = Vec::new();
        message.serialize(&mut sink);
        let parsed = Version::deserialize(&mut Reader::new(&sink)).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_round_trip_without_relay() {
        let mut message = sample(60002);
        message.relay = true;
        let mut sink = Vec::new();
        message.serialize(&mut sink);
        // 60002 predates the relay flag; no trailing byte.
        let parsed = Version::deserialize(&mut Reader::new(&sink)).unwrap();
        assert_eq!(parsed, message);
    }

    #[test]
    fn test_relay_false_survives() {
        let mut message = sample(70016);
        message.relay = false;
        let mut sink = Vec::new();
        message.serialize(&mut sink);
        let parsed = Version::deserialize(&mut Reader::new(&sink)).unwrap();
        assert!(!parsed.relay);
    }

    #[test]
    fn test_short_form_accepted() {
        let message = sample(70016);
        let mut sink = Vec::new();
        message.serialize(&mut sink);
        // Truncate to the pre-106 prefix: everything after the two
        // addresses is optional.
        sink.truncate(4 + 8 + 8 + 2 * AddressItem::size(false));
        let parsed = Version::deserialize(&mut Reader::new(&sink)).unwrap();
        assert_eq!(parsed.nonce, 0);
        assert_eq!(parsed.user_agent, "");
    }

    #[test]
    fn test_truncated_mid_field_rejected() {
        let message = sample(70016);
        let mut sink = Vec::new();
        message.serialize(&mut sink);
        sink.truncate(10);
        assert_eq!(
            Version::deserialize(&mut Reader::new(&sink)),
            Err(Error::InvalidMessage)
        );
    }
}
