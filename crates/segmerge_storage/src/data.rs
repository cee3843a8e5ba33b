//! Primitive encodings shared by every file format.
//!
//! All fixed-width integers are little-endian. Variable-length integers use
//! LEB128 (7 bits per byte, high bit = continuation). Strings are a vint byte
//! length followed by UTF-8.

use crate::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, BTreeSet};

/// Sequential writer of primitive values.
pub trait DataOutput {
    /// Writes a single byte.
    fn write_byte(&mut self, b: u8) -> StorageResult<()>;

    /// Writes a slice of bytes.
    fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()>;

    /// Writes a little-endian `i32`.
    fn write_i32(&mut self, v: i32) -> StorageResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Writes a little-endian `i64`.
    fn write_i64(&mut self, v: i64) -> StorageResult<()> {
        self.write_bytes(&v.to_le_bytes())
    }

    /// Writes a LEB128-encoded `u32`.
    fn write_vint(&mut self, mut v: u32) -> StorageResult<()> {
        while v >= 0x80 {
            self.write_byte((v as u8 & 0x7F) | 0x80)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }

    /// Writes a LEB128-encoded `u64`.
    fn write_vlong(&mut self, mut v: u64) -> StorageResult<()> {
        while v >= 0x80 {
            self.write_byte((v as u8 & 0x7F) | 0x80)?;
            v >>= 7;
        }
        self.write_byte(v as u8)
    }

    /// Writes a length-prefixed UTF-8 string.
    fn write_string(&mut self, s: &str) -> StorageResult<()> {
        let len = u32::try_from(s.len())
            .map_err(|_| StorageError::Corrupted(format!("string too long: {}", s.len())))?;
        self.write_vint(len)?;
        self.write_bytes(s.as_bytes())
    }

    /// Writes a count-prefixed set of strings in sorted order.
    fn write_set_of_strings(&mut self, set: &BTreeSet<String>) -> StorageResult<()> {
        self.write_vint(set.len() as u32)?;
        for s in set {
            self.write_string(s)?;
        }
        Ok(())
    }

    /// Writes a count-prefixed map of strings in key order.
    fn write_map_of_strings(&mut self, map: &BTreeMap<String, String>) -> StorageResult<()> {
        self.write_vint(map.len() as u32)?;
        for (k, v) in map {
            self.write_string(k)?;
            self.write_string(v)?;
        }
        Ok(())
    }
}

/// Sequential reader of primitive values.
pub trait DataInput {
    /// Reads a single byte.
    fn read_byte(&mut self) -> StorageResult<u8>;

    /// Fills `buf` completely.
    fn read_bytes(&mut self, buf: &mut [u8]) -> StorageResult<()>;

    /// Reads a little-endian `i32`.
    fn read_i32(&mut self) -> StorageResult<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    /// Reads a little-endian `i64`.
    fn read_i64(&mut self) -> StorageResult<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    /// Reads a LEB128-encoded `u32`.
    fn read_vint(&mut self) -> StorageResult<u32> {
        let mut result = 0u32;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            if shift == 28 && b & 0xF0 != 0 {
                return Err(StorageError::Corrupted("invalid vint".into()));
            }
            result |= u32::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Reads a LEB128-encoded `u64`.
    fn read_vlong(&mut self) -> StorageResult<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.read_byte()?;
            if shift == 63 && b & 0xFE != 0 {
                return Err(StorageError::Corrupted("invalid vlong".into()));
            }
            result |= u64::from(b & 0x7F) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    /// Reads a length-prefixed UTF-8 string.
    fn read_string(&mut self) -> StorageResult<String> {
        let len = self.read_vint()? as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        String::from_utf8(buf).map_err(|_| StorageError::Corrupted("invalid UTF-8 string".into()))
    }

    /// Reads a count-prefixed set of strings.
    fn read_set_of_strings(&mut self) -> StorageResult<BTreeSet<String>> {
        let count = self.read_vint()?;
        let mut set = BTreeSet::new();
        for _ in 0..count {
            set.insert(self.read_string()?);
        }
        Ok(set)
    }

    /// Reads a count-prefixed map of strings.
    fn read_map_of_strings(&mut self) -> StorageResult<BTreeMap<String, String>> {
        let count = self.read_vint()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let k = self.read_string()?;
            let v = self.read_string()?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl DataOutput for Vec<u8> {
    fn write_byte(&mut self, b: u8) -> StorageResult<()> {
        self.push(b);
        Ok(())
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> StorageResult<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

impl DataInput for &[u8] {
    fn read_byte(&mut self) -> StorageResult<u8> {
        let (&b, rest) = self
            .split_first()
            .ok_or_else(|| StorageError::Corrupted("unexpected end of data".into()))?;
        *self = rest;
        Ok(b)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> StorageResult<()> {
        if self.len() < buf.len() {
            return Err(StorageError::Corrupted("unexpected end of data".into()));
        }
        let (head, rest) = self.split_at(buf.len());
        buf.copy_from_slice(head);
        *self = rest;
        Ok(())
    }
}
