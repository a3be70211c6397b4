//! Inventory payloads (`inv`, `getdata`).
//!
//! The runtime does not fetch or validate inventoried data; these codecs
//! exist so relay protocols riding on the dispatch rails get typed items
//! instead of raw bytes.

use crate::error::Error;
use crate::messages::codec::{self, Reader};
use bytes::BufMut;

/// Most items allowed in a single inventory payload.
pub const MAX_INVENTORY: usize = 50_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    Other(u32),
}

impl InvType {
    fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Tx,
            2 => Self::Block,
            3 => Self::FilteredBlock,
            4 => Self::CompactBlock,
            0x4000_0001 => Self::WitnessTx,
            0x4000_0002 => Self::WitnessBlock,
            other => Self::Other(other),
        }
    }

    fn to_raw(self) -> u32 {
        match self {
            Self::Tx => 1,
            Self::Block => 2,
            Self::FilteredBlock => 3,
            Self::CompactBlock => 4,
            Self::WitnessTx => 0x4000_0001,
            Self::WitnessBlock => 0x4000_0002,
            Self::Other(other) => other,
        }
    }
}

/// One announced or requested item: type tag plus hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvItem {
    pub inv_type: InvType,
    pub hash: [u8; 32],
}

impl InvItem {
    pub fn serialize(&self, sink: &mut impl BufMut) {
        sink.put_u32_le(self.inv_type.to_raw());
        sink.put_slice(&self.hash);
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let inv_type = InvType::from_raw(reader.read_u32_le()?);
        let hash = reader.read_array::<32>()?;
        Ok(Self { inv_type, hash })
    }
}

/// Counted item list shared by `inv` and `getdata`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inventory {
    pub items: Vec<InvItem>,
}

impl Inventory {
    pub const INV_COMMAND: &'static str = "inv";
    pub const GET_DATA_COMMAND: &'static str = "getdata";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        codec::write_varint(sink, self.items.len() as u64);
        for item in &self.items {
            item.serialize(sink);
        }
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let count = reader.read_varint()?;
        let count = usize::try_from(count).map_err(|_| Error::InvalidMessage)?;
        if count > MAX_INVENTORY {
            return Err(Error::InvalidMessage);
        }
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(InvItem::deserialize(reader)?);
        }
        Ok(Self { items })
    }
}
