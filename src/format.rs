//! On-disk layout of the 8sm file format.
//!
//! All integers are little-endian. The file is laid out as:
//!
//! ```text
//! [magic: u32]            0x6d73386a ('j','8','s','m')
//! [sidecar_len: u32]      S, bytes of embedded sidecar data
//! [sidecar: S bytes]      opaque application bytes
//! [num_keys: u64]         N, number of directory entries
//! [directory: N x 16B]    (key: u64, offset: i64), ascending key order
//! [records...]            per-key regions, located by directory offsets
//! ```
//!
//! Each record is a `caplen` word (upper 32 bits capacity, lower 32 bits
//! length, both counted in 64-bit slots) followed by `capacity` slots, of
//! which the first `length` hold the sorted, unique values. The tail slots
//! are reserved growth space for in-place commits.
//!
//! An empty or nonexistent file is legal and opens as an empty map.

use crate::error::{Error, Result};
use bytes::Bytes;
use std::io::{Read, Write};

/// Magic number identifying an 8sm file ('j','8','s','m').
pub const MAGIC: u32 = 0x6d73_386a;

/// Size of a directory entry in bytes (u64 key + i64 offset).
pub const DIR_ENTRY_SIZE: u64 = 16;

/// Size of a record's caplen word in bytes.
pub const CAPLEN_SIZE: u64 = 8;

pub(crate) fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub(crate) fn write_u32<W: Write>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_i64<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

/// Decode a little-endian u64 sequence from raw bytes.
///
/// `bytes.len()` must be a multiple of 8.
pub(crate) fn decode_values(bytes: &[u8]) -> Vec<u64> {
    bytes
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().unwrap()))
        .collect()
}

/// The packed capacity/length word at the head of every record.
///
/// The upper 32 bits hold the reserved capacity and the lower 32 bits the
/// used length, both counted in 64-bit value slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapLen {
    /// Slots reserved for values.
    pub capacity: u32,
    /// Slots currently occupied by values.
    pub length: u32,
}

impl CapLen {
    /// Create a new caplen word.
    pub fn new(capacity: u32, length: u32) -> Self {
        Self { capacity, length }
    }

    /// Pack into the on-disk u64 representation.
    pub fn pack(&self) -> u64 {
        (u64::from(self.capacity) << 32) | u64::from(self.length)
    }

    /// Unpack from the on-disk u64 representation.
    ///
    /// Fails if the word declares more used slots than reserved slots.
    pub fn unpack(word: u64) -> Result<Self> {
        let capacity = (word >> 32) as u32;
        let length = word as u32;
        if length > capacity {
            return Err(Error::corruption(format!(
                "caplen length {} exceeds capacity {}",
                length, capacity
            )));
        }
        Ok(Self { capacity, length })
    }

    /// Read and unpack a caplen word.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        Self::unpack(read_u64(reader)?)
    }

    /// Pack and write a caplen word.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u64(writer, self.pack())
    }

    /// Number of reserved slots past the used values.
    pub fn reserved(&self) -> u32 {
        self.capacity - self.length
    }
}

/// A single entry of the on-disk directory table.
///
/// The offset is signed so the two-pass directory write can distinguish a
/// valid offset from the unset placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// The stored key.
    pub key: u64,
    /// Byte offset of the key's record, or 0 while unset.
    pub offset: i64,
}

impl DirEntry {
    /// Read an entry from the directory table.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let key = read_u64(reader)?;
        let offset = read_i64(reader)?;
        Ok(Self { key, offset })
    }

    /// Write an entry to the directory table.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u64(writer, self.key)?;
        write_i64(writer, self.offset)
    }
}

/// The file header: magic, sidecar length, and the sidecar bytes.
#[derive(Debug, Clone, Default)]
pub struct Header {
    /// Opaque application bytes preserved across rewrites.
    pub sidecar: Bytes,
}

impl Header {
    /// Read and validate the header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let magic = read_u32(reader)?;
        if magic != MAGIC {
            return Err(Error::corruption(format!(
                "invalid magic: expected {:#x}, got {:#x}",
                MAGIC, magic
            )));
        }
        let sidecar_len = read_u32(reader)? as usize;
        let mut sidecar = vec![0u8; sidecar_len];
        reader.read_exact(&mut sidecar)?;
        Ok(Self { sidecar: Bytes::from(sidecar) })
    }

    /// Write the header.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        write_u32(writer, MAGIC)?;
        write_u32(writer, self.sidecar.len() as u32)?;
        writer.write_all(&self.sidecar)?;
        Ok(())
    }

    /// Byte offset of the first directory entry (past `num_keys`).
    pub fn directory_start(&self) -> u64 {
        directory_start(self.sidecar.len())
    }
}

/// Byte offset of the first directory entry for a given sidecar size.
pub fn directory_start(sidecar_len: usize) -> u64 {
    16 + sidecar_len as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_caplen_pack_unpack() {
        let caplen = CapLen::new(32, 7);
        assert_eq!(caplen.pack(), (32u64 << 32) | 7);

        let decoded = CapLen::unpack(caplen.pack()).unwrap();
        assert_eq!(decoded, caplen);
        assert_eq!(decoded.reserved(), 25);
    }

    #[test]
    fn test_caplen_rejects_length_over_capacity() {
        let word = (4u64 << 32) | 5;
        let result = CapLen::unpack(word);
        assert!(matches!(result.unwrap_err(), Error::Corruption(_)));
    }

    #[test]
    fn test_dir_entry_round_trip() {
        let entry = DirEntry { key: 0xdead_beef, offset: 1 << 40 };

        let mut buf = Vec::new();
        entry.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), DIR_ENTRY_SIZE as usize);

        let decoded = DirEntry::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_header_round_trip() {
        let header = Header { sidecar: Bytes::from_static(b"bookkeeping") };

        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();

        let decoded = Header::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded.sidecar, header.sidecar);
        assert_eq!(decoded.directory_start(), 16 + 11);
    }

    #[test]
    fn test_header_invalid_magic() {
        let mut buf = Vec::new();
        write_u32(&mut buf, 0x0bad_cafe).unwrap();
        write_u32(&mut buf, 0).unwrap();

        let result = Header::read_from(&mut Cursor::new(buf));
        assert!(matches!(result.unwrap_err(), Error::Corruption(_)));
    }

    #[test]
    fn test_decode_values() {
        let mut buf = Vec::new();
        for v in [5u64, 10, 20] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(decode_values(&buf), vec![5, 10, 20]);
    }
}
