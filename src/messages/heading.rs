//! The 24-byte message heading.

use crate::error::Error;
use crate::messages::codec::Reader;
use bytes::BufMut;
use sha2::{Digest, Sha256};

/// Serialized heading size.
pub const HEADING_SIZE: usize = 24;

/// Command field width; ASCII, right-padded with zero bytes.
pub const COMMAND_SIZE: usize = 12;

/// Default payload cap: the chain's maximum block weight. Anything larger
/// is dropped before the payload is read.
pub const MAXIMUM_PAYLOAD: u32 = 4_000_000;

/// Frame envelope preceding every payload on the wire:
/// magic, command, payload size, then the first four bytes of
/// SHA256(SHA256(payload)). Numeric fields are little-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heading {
    pub magic: u32,
    pub command: String,
    pub payload_size: u32,
    pub checksum: u32,
}

impl Heading {
    /// Build the heading for an already-serialized payload.
    pub fn from_payload(magic: u32, command: &str, payload: &[u8]) -> Self {
        Self {
            magic,
            command: command.to_owned(),
            payload_size: payload.len() as u32,
            checksum: checksum(payload),
        }
    }

    pub fn serialize(&self) -> [u8; HEADING_SIZE] {
        let mut out = [0u8; HEADING_SIZE];
        let mut sink = &mut out[..];
        sink.put_u32_le(self.magic);

        let mut command = [0u8; COMMAND_SIZE];
        let bytes = self.command.as_bytes();
        command[..bytes.len().min(COMMAND_SIZE)]
            .copy_from_slice(&bytes[..bytes.len().min(COMMAND_SIZE)]);
        sink.put_slice(&command);

        sink.put_u32_le(self.payload_size);
        sink.put_u32_le(self.checksum);
        out
    }

    pub fn deserialize(data: &[u8; HEADING_SIZE]) -> Result<Self, Error> {
        let mut reader = Reader::new(data);
        let magic = reader.read_u32_le().map_err(|_| Error::InvalidHeading)?;
        let raw = reader.read_array::<COMMAND_SIZE>().map_err(|_| Error::InvalidHeading)?;
        let payload_size = reader.read_u32_le().map_err(|_| Error::InvalidHeading)?;
        let checksum = reader.read_u32_le().map_err(|_| Error::InvalidHeading)?;

        // Command is the prefix before the first pad byte. Unknown commands
        // are fine (routed to the unknown bucket); non-ASCII is not.
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(COMMAND_SIZE);
        let command = std::str::from_utf8(&raw[..end])
            .ok()
            .filter(|text| text.is_ascii())
            .ok_or(Error::InvalidHeading)?
            .to_owned();

        Ok(Self { magic, command, payload_size, checksum })
    }

    /// Validate against the configured network and payload cap before the
    /// payload is read off the socket.
    pub fn verify(&self, magic: u32, maximum_payload: u32) -> Result<(), Error> {
        if self.magic != magic {
            return Err(Error::InvalidMagic);
        }
        if self.payload_size > maximum_payload {
            return Err(Error::OversizedPayload);
        }
        Ok(())
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> Result<(), Error> {
        if self.checksum != checksum(payload) {
            return Err(Error::InvalidChecksum);
        }
        Ok(())
    }
}

/// First four bytes of the double-SHA256 of the payload, little-endian.
pub fn checksum(payload: &[u8]) -> u32 {
    let once = Sha256::digest(payload);
    let twice = Sha256::digest(once);
    u32::from_le_bytes([twice[0], twice[1], twice[2], twice[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_payload_checksum() {
        // Double-SHA256 of the empty string begins 5d f6 e0 e2.
        assert_eq!(checksum(&[]), u32::from_le_bytes([0x5d, 0xf6, 0xe0, 0xe2]));
    }

    #[test]
    fn test_serialize_round_trip() {
        let heading = Heading::from_payload(0xd9b4bef9, "ping", &[1, 2, 3, 4, 5, 6, 7, 8]);
        let bytes = heading.serialize();
        assert_eq!(bytes.len(), HEADING_SIZE);
        let parsed = Heading::deserialize(&bytes).unwrap();
        assert_eq!(parsed, heading);
        assert_eq!(parsed.command, "ping");
        assert_eq!(parsed.payload_size, 8);
    }

    #[test]
    fn test_verify_magic_and_size() {
        let heading = Heading::from_payload(1, "ping", &[]);
        assert_eq!(heading.verify(2, MAXIMUM_PAYLOAD), Err(Error::InvalidMagic));

        let oversized = Heading {
            magic: 1,
            command: "block".into(),
            payload_size: u32::MAX,
            checksum: 0,
        };
        assert_eq!(oversized.verify(1, MAXIMUM_PAYLOAD), Err(Error::OversizedPayload));
    }

    #[test]
    fn test_checksum_mismatch() {
        let heading = Heading::from_payload(1, "ping", &[1, 2, 3]);
        assert!(heading.verify_checksum(&[1, 2, 3]).is_ok());
        assert_eq!(heading.verify_checksum(&[3, 2, 1]), Err(Error::InvalidChecksum));
    }

    #[test]
    fn test_unknown_command_accepted() {
        let heading = Heading::from_payload(1, "frobnicate", &[]);
        let parsed = Heading::deserialize(&heading.serialize()).unwrap();
        assert_eq!(parsed.command, "frobnicate");
    }

    #[test]
    fn test_non_ascii_command_rejected() {
        let mut bytes = Heading::from_payload(1, "ping", &[]).serialize();
        bytes[4] = 0xff;
        assert_eq!(Heading::deserialize(&bytes), Err(Error::InvalidHeading));
    }
}
