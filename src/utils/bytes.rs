//! Fixed-width little-endian byte buffer used by the block and transaction codecs.
//!
//! Field widths are part of the consensus contract: ints are 4 bytes, longs
//! are 8 bytes, binary fields are written verbatim.

use crate::error::{ChainError, Result};

#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_byte(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_int(&mut self, value: i32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn write_long(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Big-endian 8-byte form used for ids and addresses embedded in payloads.
    pub fn write_id(&mut self, value: u64) -> &mut Self {
        self.buf.extend_from_slice(&value.to_be_bytes());
        self
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    /// Writes a binary field that must have exactly `len` bytes.
    pub fn write_fixed(&mut self, field: &str, value: &[u8], len: usize) -> Result<&mut Self> {
        if value.len() != len {
            return Err(ChainError::Serialization(format!(
                "{field} must be {len} bytes, got {}",
                value.len()
            )));
        }
        self.buf.extend_from_slice(value);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                ChainError::Serialization(format!(
                    "Unexpected end of buffer at offset {} (need {len} bytes)",
                    self.offset
                ))
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_int(&mut self) -> Result<i32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(i32::from_le_bytes(raw))
    }

    pub fn read_long(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn read_id(&mut self) -> Result<u64> {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(raw))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len)?.to_vec())
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths_and_endianness() {
        let mut writer = ByteWriter::with_capacity(32);
        writer
            .write_byte(7)
            .write_int(1)
            .write_long(2)
            .write_id(3)
            .write_bytes(&[0xaa, 0xbb]);
        let bytes = writer.into_bytes();

        assert_eq!(bytes.len(), 1 + 4 + 8 + 8 + 2);
        assert_eq!(&bytes[1..5], &[1, 0, 0, 0]);
        assert_eq!(&bytes[5..13], &[2, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[13..21], &[0, 0, 0, 0, 0, 0, 0, 3]);

        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_byte().unwrap(), 7);
        assert_eq!(reader.read_int().unwrap(), 1);
        assert_eq!(reader.read_long().unwrap(), 2);
        assert_eq!(reader.read_id().unwrap(), 3);
        assert_eq!(reader.read_bytes(2).unwrap(), vec![0xaa, 0xbb]);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_fixed_field_length_is_enforced() {
        let mut writer = ByteWriter::default();
        assert!(writer.write_fixed("payloadHash", &[0u8; 31], 32).is_err());
        assert!(writer.write_fixed("payloadHash", &[0u8; 32], 32).is_ok());
    }

    #[test]
    fn test_reader_reports_truncation() {
        let mut reader = ByteReader::new(&[1, 2, 3]);
        assert!(reader.read_int().is_err());
    }
}
