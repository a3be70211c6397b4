//! Heartbeat payloads.

use crate::error::Error;
use crate::messages::codec::Reader;
use bytes::BufMut;

/// The `ping` payload: a random nonce echoed by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ping {
    pub nonce: u64,
}

impl Ping {
    pub const COMMAND: &'static str = "ping";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        sink.put_u64_le(self.nonce);
    }

    /// A nonce-less ping (pre-nonce peers) reads as nonce zero.
    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        if reader.is_exhausted() {
            return Ok(Self { nonce: 0 });
        }
        Ok(Self { nonce: reader.read_u64_le()? })
    }
}

/// The `pong` payload: the echoed nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pong {
    pub nonce: u64,
}

impl Pong {
    pub const COMMAND: &'static str = "pong";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        sink.put_u64_le(self.nonce);
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        Ok(Self { nonce: reader.read_u64_le()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let ping = Ping { nonce: 0xdead_beef_0bad_cafe };
        let mut sink = Vec::new();
        ping.serialize(&mut sink);
        assert_eq!(Ping::deserialize(&mut Reader::new(&sink)).unwrap(), ping);

        let pong = Pong { nonce: ping.nonce };
        let mut sink = Vec::new();
        pong.serialize(&mut sink);
        assert_eq!(Pong::deserialize(&mut Reader::new(&sink)).unwrap(), pong);
    }

    #[test]
    fn test_empty_ping_reads_zero_nonce() {
        assert_eq!(Ping::deserialize(&mut Reader::new(&[])).unwrap().nonce, 0);
    }

    #[test]
    fn test_truncated_pong_rejected() {
        assert_eq!(Pong::deserialize(&mut Reader::new(&[1, 2])), Err(Error::InvalidMessage));
    }
}
