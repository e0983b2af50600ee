// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Little-endian primitive encoder/decoder shared by the envelope and
//! discovery formats.
//!
//! No alignment padding: every field is written back to back. Strings and
//! byte sequences carry an explicit length prefix so arbitrary content
//! (NUL, quotes, newlines) never needs escaping.

use crate::error::DecodeError;

/// Append-only little-endian writer.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Raw bytes, no prefix.
    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// String with a u16 length prefix.
    ///
    /// Callers guarantee `s.len() <= u16::MAX`; longer input is truncated
    /// to the prefix width rather than producing an inconsistent frame.
    pub fn put_str16(&mut self, s: &str) {
        let bytes = &s.as_bytes()[..s.len().min(u16::MAX as usize)];
        self.put_u16(bytes.len() as u16);
        self.buf.extend_from_slice(bytes);
    }

    /// Byte sequence with a u32 length prefix (same truncation rule).
    pub fn put_bytes32(&mut self, bytes: &[u8]) {
        let bytes = &bytes[..bytes.len().min(u32::MAX as usize)];
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian reader.
///
/// Every read checks the remaining length first and fails with
/// [`DecodeError::Truncated`]; nothing ever indexes past the slice.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Take the next `n` bytes.
    pub fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated {
            needed: usize::MAX,
            available: self.buf.len(),
        })?;
        match self.buf.get(self.pos..end) {
            Some(slice) => {
                self.pos = end;
                Ok(slice)
            }
            None => Err(DecodeError::Truncated {
                needed: end,
                available: self.buf.len(),
            }),
        }
    }

    pub fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let b = self.take(N)?;
        let mut raw = [0u8; N];
        raw.copy_from_slice(b);
        Ok(raw)
    }

    /// u16-prefixed UTF-8 string.
    pub fn str16(&mut self) -> Result<String, DecodeError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::Malformed("string is not valid UTF-8"))
    }

    /// u32-prefixed byte sequence.
    pub fn bytes32(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    /// Fail if anything is left unread.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(DecodeError::Malformed("trailing bytes after message"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_little_endian() {
        let mut w = WireWriter::new();
        w.put_u8(0xAB);
        w.put_u16(0x0102);
        w.put_u32(0x0304_0506);
        w.put_u64(7);
        let bytes = w.finish();

        assert_eq!(&bytes[..3], &[0xAB, 0x02, 0x01]);
        let mut r = WireReader::new(&bytes);
        assert_eq!(r.u8().unwrap(), 0xAB);
        assert_eq!(r.u16().unwrap(), 0x0102);
        assert_eq!(r.u32().unwrap(), 0x0304_0506);
        assert_eq!(r.u64().unwrap(), 7);
        assert!(r.finish().is_ok());
    }

    #[test]
    fn test_take_past_end_is_truncated() {
        let bytes = [1u8, 2, 3];
        let mut r = WireReader::new(&bytes);
        assert_eq!(
            r.u32(),
            Err(DecodeError::Truncated {
                needed: 4,
                available: 3
            })
        );
        // Position unchanged after a failed read.
        assert_eq!(r.position(), 0);
    }

    #[test]
    fn test_str16_rejects_invalid_utf8() {
        let bytes = [2u8, 0, 0xFF, 0xFE];
        let mut r = WireReader::new(&bytes);
        assert!(matches!(r.str16(), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_trailing_bytes_are_malformed() {
        let bytes = [0u8, 0];
        let mut r = WireReader::new(&bytes);
        r.u8().unwrap();
        assert!(matches!(r.finish(), Err(DecodeError::Malformed(_))));
    }
}
