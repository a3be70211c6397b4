//! The `reject` payload (protocol 70002).

use crate::error::Error;
use crate::messages::codec::{self, Reader};
use bytes::BufMut;

/// Reject reason codes. Advisory only; misbehaving peers ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RejectCode {
    Undefined = 0x00,
    /// Message could not be decoded.
    Malformed = 0x01,
    /// Data failed validation.
    Invalid = 0x10,
    /// Uses an obsolete protocol feature.
    Obsolete = 0x11,
    /// Already have this data.
    Duplicate = 0x12,
    /// Violates policy, not consensus.
    NonStandard = 0x40,
    /// Output below the dust threshold.
    Dust = 0x41,
    /// Transaction fee too low.
    InsufficientFee = 0x42,
    /// Conflicts with a checkpoint.
    Checkpoint = 0x43,
}

impl RejectCode {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0x01 => Self::Malformed,
            0x10 => Self::Invalid,
            0x11 => Self::Obsolete,
            0x12 => Self::Duplicate,
            0x40 => Self::NonStandard,
            0x41 => Self::Dust,
            0x42 => Self::InsufficientFee,
            0x43 => Self::Checkpoint,
            _ => Self::Undefined,
        }
    }
}

/// Longest accepted rejected-command or reason string.
const MAX_REJECT_STRING: usize = 111;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    /// Command of the message being rejected.
    pub message: String,
    pub code: RejectCode,
    pub reason: String,
    /// Hash of the rejected item, present for tx/block rejections.
    pub hash: Option<[u8; 32]>,
}

impl Reject {
    pub const COMMAND: &'static str = "reject";

    pub fn serialize(&self, sink: &mut impl BufMut) {
        codec::write_varstr(sink, &self.message);
        sink.put_u8(self.code as u8);
        codec::write_varstr(sink, &self.reason);
        if let Some(hash) = &self.hash {
            sink.put_slice(hash);
        }
    }

    pub fn deserialize(reader: &mut Reader<'_>) -> Result<Self, Error> {
        let message = reader.read_varstr(MAX_REJECT_STRING)?;
        let code = RejectCode::from_byte(reader.read_u8()?);
        let reason = reader.read_varstr(MAX_REJECT_STRING)?;
        let hash = if reader.is_exhausted() {
            None
        } else {
            Some(reader.read_array::<32>()?)
        };
        Ok(Self { message, code, reason, hash })
    }
}
