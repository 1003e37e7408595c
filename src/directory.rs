//! In-memory key -> record-offset directory.
//!
//! The directory is built once at open time by scanning the on-disk entry
//! table. It runs in one of two modes:
//!
//! - **Exact mode** (`shift == 0`): every stored key maps directly to its
//!   record's byte offset. Lookup is a hash probe.
//! - **Truncated-key mode** (`shift > 0`): `key >> shift` maps to the table
//!   *index* of the first on-disk entry sharing that truncated key. Lookup
//!   seeks into the entry table and scans forward, at most `2^shift`
//!   entries, until the exact key or a different truncated prefix is seen.
//!   This trades one extra seek per lookup for roughly `2^shift` times less
//!   directory RAM.
//!
//! Truncated-key mode requires the on-disk table to be sorted by key; files
//! written before that guarantee must be repacked in exact mode first.

use crate::error::{Error, Result};
use crate::format::{DirEntry, Header, DIR_ENTRY_SIZE};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

/// The in-memory directory of a map file.
#[derive(Debug)]
pub struct Directory {
    /// Exact mode: key -> record byte offset.
    /// Truncated mode: (key >> shift) -> index of the first matching entry
    /// in the on-disk table.
    offsets: HashMap<u64, i64>,
    shift: u32,
    /// Byte offset of the first on-disk directory entry.
    start: u64,
    /// Number of on-disk directory entries.
    entries: u64,
}

impl Directory {
    /// An empty directory for a missing or zero-length file.
    pub fn empty(shift: u32) -> Self {
        Self { offsets: HashMap::new(), shift, start: 0, entries: 0 }
    }

    /// Build a directory by scanning the header and entry table.
    ///
    /// Returns the directory together with the parsed header so the caller
    /// keeps the sidecar bytes. Fails with [`Error::NotSorted`] if a
    /// descending key pair is seen while a shift is requested.
    pub fn load<R: Read>(reader: &mut R, shift: u32) -> Result<(Self, Header)> {
        let header = Header::read_from(reader)?;
        let num_keys = crate::format::read_u64(reader)?;

        let mut offsets = HashMap::with_capacity(num_keys as usize);
        let mut last_key = 0u64;
        for i in 0..num_keys {
            let entry = DirEntry::read_from(reader)?;
            if shift > 0 {
                if i > 0 && entry.key < last_key {
                    return Err(Error::not_sorted(format!(
                        "entry {} key {} follows {}; repack in exact mode",
                        i, entry.key, last_key
                    )));
                }
                last_key = entry.key;
                // first table index wins for each truncated key
                offsets.entry(entry.key >> shift).or_insert(i as i64);
            } else {
                offsets.insert(entry.key, entry.offset);
            }
        }

        let start = header.directory_start();
        Ok((Self { offsets, shift, start, entries: num_keys }, header))
    }

    /// Rebuild an exact-mode directory after a full rewrite.
    pub(crate) fn from_offsets(offsets: HashMap<u64, i64>, start: u64) -> Self {
        let entries = offsets.len() as u64;
        Self { offsets, shift: 0, start, entries }
    }

    /// Resolve a key to its record's byte offset.
    ///
    /// In truncated-key mode this seeks into the on-disk entry table and
    /// scans the key's bucket, so it needs the backing file.
    pub fn resolve(&self, file: &mut File, key: u64) -> Result<Option<i64>> {
        let Some(&slot) = self.offsets.get(&(key >> self.shift)) else {
            return Ok(None);
        };
        if self.shift == 0 {
            return Ok(Some(slot));
        }

        // jump to the entry table and scan the bucket for the true offset
        let mut index = slot as u64;
        file.seek(SeekFrom::Start(self.start + index * DIR_ENTRY_SIZE))?;
        while index < self.entries {
            let entry = DirEntry::read_from(file)?;
            if entry.key >> self.shift != key >> self.shift {
                return Ok(None);
            }
            if entry.key == key {
                if entry.offset <= 0 {
                    // unset placeholder, should not survive a commit
                    return Ok(None);
                }
                return Ok(Some(entry.offset));
            }
            index += 1;
        }
        Ok(None)
    }

    /// Record offset for a key in exact mode.
    pub(crate) fn offset_of(&self, key: u64) -> Option<i64> {
        debug_assert_eq!(self.shift, 0);
        self.offsets.get(&key).copied()
    }

    /// Whether the exact-mode directory contains a key.
    pub(crate) fn contains(&self, key: u64) -> bool {
        debug_assert_eq!(self.shift, 0);
        self.offsets.contains_key(&key)
    }

    /// Iterate the stored keys. Only meaningful in exact mode; under a
    /// shift the map keys are truncated prefixes.
    pub(crate) fn keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.offsets.keys().copied()
    }

    /// Iterate `(key, offset)` pairs. Exact mode only.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (u64, i64)> + '_ {
        debug_assert_eq!(self.shift, 0);
        self.offsets.iter().map(|(&k, &o)| (k, o))
    }

    /// The active shift.
    pub fn shift(&self) -> u32 {
        self.shift
    }

    /// Whether the directory keys are truncated.
    pub fn is_shifted(&self) -> bool {
        self.shift > 0
    }

    /// Number of on-disk directory entries.
    pub fn num_entries(&self) -> u64 {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format;
    use bytes::Bytes;
    use std::io::Cursor;

    fn encode_table(sidecar: &'static [u8], entries: &[(u64, i64)]) -> Vec<u8> {
        let mut buf = Vec::new();
        let header = Header { sidecar: Bytes::from_static(sidecar) };
        header.write_to(&mut buf).unwrap();
        format::write_u64(&mut buf, entries.len() as u64).unwrap();
        for &(key, offset) in entries {
            DirEntry { key, offset }.write_to(&mut buf).unwrap();
        }
        buf
    }

    #[test]
    fn test_load_exact() {
        let buf = encode_table(b"", &[(1, 100), (5, 200), (9, 300)]);
        let (dir, header) = Directory::load(&mut Cursor::new(buf), 0).unwrap();

        assert_eq!(dir.num_entries(), 3);
        assert_eq!(dir.offset_of(5), Some(200));
        assert_eq!(dir.offset_of(6), None);
        assert!(header.sidecar.is_empty());
        assert_eq!(dir.start, 16);
    }

    #[test]
    fn test_load_exact_with_sidecar() {
        let buf = encode_table(b"notes", &[(7, 64)]);
        let (dir, header) = Directory::load(&mut Cursor::new(buf), 0).unwrap();

        assert_eq!(header.sidecar.as_ref(), b"notes");
        assert_eq!(dir.start, 16 + 5);
    }

    #[test]
    fn test_load_shifted_buckets_first_index() {
        // keys 8..11 share the truncated prefix 1 under shift 3
        let buf = encode_table(b"", &[(8, 100), (9, 200), (11, 300), (16, 400)]);
        let (dir, _) = Directory::load(&mut Cursor::new(buf), 3).unwrap();

        assert_eq!(dir.offsets.get(&1), Some(&0));
        assert_eq!(dir.offsets.get(&2), Some(&3));
        assert_eq!(dir.offsets.len(), 2);
    }

    #[test]
    fn test_load_shifted_rejects_unsorted() {
        let buf = encode_table(b"", &[(9, 100), (8, 200)]);
        let result = Directory::load(&mut Cursor::new(buf), 1);
        assert!(matches!(result.unwrap_err(), Error::NotSorted(_)));
    }

    #[test]
    fn test_load_unsorted_allowed_in_exact_mode() {
        let buf = encode_table(b"", &[(9, 100), (8, 200)]);
        let (dir, _) = Directory::load(&mut Cursor::new(buf), 0).unwrap();
        assert_eq!(dir.offset_of(8), Some(200));
        assert_eq!(dir.offset_of(9), Some(100));
    }
}
