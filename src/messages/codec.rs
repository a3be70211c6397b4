//! Little-endian wire primitives shared by the payload codecs.

use crate::error::Error;
use bytes::{Buf, BufMut};

/// Checked reader over a payload slice. Underflow or malformed fields
/// surface as `InvalidMessage`; the channel stops on that code rather than
/// panicking on attacker-controlled lengths.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_exhausted(&self) -> bool {
        self.buf.is_empty()
    }

    fn require(&self, size: usize) -> Result<(), Error> {
        if self.buf.remaining() < size {
            return Err(Error::InvalidMessage);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        self.require(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        self.require(2)?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u16_be(&mut self) -> Result<u16, Error> {
        self.require(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        self.require(4)?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_i32_le(&mut self) -> Result<i32, Error> {
        self.require(4)?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        self.require(8)?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_i64_le(&mut self) -> Result<i64, Error> {
        self.require(8)?;
        Ok(self.buf.get_i64_le())
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        self.require(N)?;
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    pub fn read_bytes(&mut self, size: usize) -> Result<Vec<u8>, Error> {
        self.require(size)?;
        let mut out = vec![0u8; size];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    /// Variable-length integer (compact size).
    pub fn read_varint(&mut self) -> Result<u64, Error> {
        match self.read_u8()? {
            0xfd => Ok(u64::from(self.read_u16_le()?)),
            0xfe => Ok(u64::from(self.read_u32_le()?)),
            0xff => self.read_u64_le(),
            byte => Ok(u64::from(byte)),
        }
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_varstr(&mut self, limit: usize) -> Result<String, Error> {
        let size = self.read_varint()?;
        let size = usize::try_from(size).map_err(|_| Error::InvalidMessage)?;
        if size > limit {
            return Err(Error::InvalidMessage);
        }
        let bytes = self.read_bytes(size)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidMessage)
    }
}

pub fn write_varint(sink: &mut impl BufMut, value: u64) {
    match value {
        0..=0xfc => sink.put_u8(value as u8),
        0xfd..=0xffff => {
            sink.put_u8(0xfd);
            sink.put_u16_le(value as u16);
        }
        0x1_0000..=0xffff_ffff => {
            sink.put_u8(0xfe);
            sink.put_u32_le(value as u32);
        }
        _ => {
            sink.put_u8(0xff);
            sink.put_u64_le(value);
        }
    }
}

pub fn write_varstr(sink: &mut impl BufMut, value: &str) {
    write_varint(sink, value.len() as u64);
    sink.put_slice(value.as_bytes());
}

/// Serialized size of a varint.
pub fn varint_size(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_boundaries() {
        for value in [0u64, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, u64::MAX] {
            let mut sink = Vec::new();
            write_varint(&mut sink, value);
            assert_eq!(sink.len(), varint_size(value));
            let mut reader = Reader::new(&sink);
            assert_eq!(reader.read_varint().unwrap(), value);
            assert!(reader.is_exhausted());
        }
    }

    #[test]
    fn test_varstr_round_trip() {
        let mut sink = Vec::new();
        write_varstr(&mut sink, "/sierra:0.3.0/");
        let mut reader = Reader::new(&sink);
        assert_eq!(reader.read_varstr(256).unwrap(), "/sierra:0.3.0/");
    }

    #[test]
    fn test_underflow_is_invalid_message() {
        let mut reader = Reader::new(&[0x01, 0x02]);
        assert_eq!(reader.read_u32_le(), Err(Error::InvalidMessage));
    }

    #[test]
    fn test_varstr_limit_enforced() {
        let mut sink = Vec::new();
        write_varstr(&mut sink, "too long for the limit");
        let mut reader = Reader::new(&sink);
        assert_eq!(reader.read_varstr(4), Err(Error::InvalidMessage));
    }
}
