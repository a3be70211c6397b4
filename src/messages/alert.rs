//! The legacy `alert` payload (protocol 31402). Log-only; signatures are
//! obsolete in the ecosystem and deliberately not validated.

use crate::error::Error;
use crate::messages::codec::{self, Reader};
use bytes::BufMut;

/// Longest accepted alert body or signature.
const MAX_ALERT_FIELD: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Serialized alert body, opaque to the runtime.
    pub payload: Vec<u8>,
    /// Signature over the body; carried, never checked.
    pub signature: Vec<u8>,
}

impl Alert {
    pub const COMMAND: &'static str = "alert";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        codec::write_varint(sink, self.payload.len() as u64);
        sink.put_slice(&self.payload);
        codec::write_varint(sink, self.signature.len() as u64);
        sink.put_slice(&self.signature);
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let payload = read_varbytes(reader)?;
        let signature = read_varbytes(reader)?;
        Ok(Self { payload, signature })
    }
}

fn read_varbytes(reader: &mut Reader<'_>) -> Result<Vec<u8>, Error> {
    let size = reader.read_varint()?;
    let size = usize::try_from(size).map_err(|_| Error::InvalidMessage)?;
    if size > MAX_ALERT_FIELD {
        return Err(Error::InvalidMessage);
    }
    reader.read_bytes(size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let alert = Alert { payload: vec![1, 2, 3], signature: vec![9; 70] };
        let mut sink = Vec::new();
        alert.serialize(&mut sink);
        assert_eq!(Alert::deserialize(&mut Reader::new(&sink)).unwrap(), alert);
    }

    #[test]
    fn test_oversized_field_rejected() {
        let mut sink = Vec::new();
        codec::write_varint(&mut sink, (MAX_ALERT_FIELD + 1) as u64);
        assert_eq!(Alert::deserialize(&mut Reader::new(&sink)), Err(Error::InvalidMessage));
    }
}
