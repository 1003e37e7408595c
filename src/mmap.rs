//! Memory-mapped zero-copy reader.
//!
//! [`MmapSetMap`] maps the whole file read-only and serves each key's
//! values as a slice straight out of the mapping, with no per-read seeks or
//! copies. Every record is bounds-checked once, at map time.
//!
//! The on-disk format is little-endian, so a raw slice view is only valid
//! on little-endian hosts; construction refuses to map on anything else.
//! It likewise refuses shifted maps (the truncated directory does not
//! expose original keys) and files whose record region is not 8-byte
//! aligned, since an unaligned `&[u64]` view would be undefined behavior.

use crate::error::{Error, Result};
use crate::format::CapLen;
use crate::reader::{SetMap, SetRead};
use memmap2::Mmap;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::slice;

/// A read-only, memory-mapped view of a map file.
///
/// Reads are zero-copy and the mapping is immutable, so independent `get`
/// calls may proceed concurrently.
#[derive(Debug)]
pub struct MmapSetMap {
    mmap: Mmap,
    /// key -> (byte offset of the first value slot, used slot count)
    nodes: HashMap<u64, (usize, usize)>,
    /// key -> (byte offset, byte length) of the reserved trailing region
    extras: HashMap<u64, (usize, usize)>,
}

impl MmapSetMap {
    /// Maps the backing file of an exact-mode [`SetMap`].
    ///
    /// Fails on shifted maps, on big-endian hosts, on files whose record
    /// region is not 8-byte aligned, and on records that do not fit the
    /// mapping.
    pub fn new(map: &SetMap) -> Result<Self> {
        if map.directory.is_shifted() {
            return Err(Error::not_implemented(
                "memory mapping a map with a shifted directory",
            ));
        }
        if cfg!(target_endian = "big") {
            return Err(Error::not_implemented(
                "memory mapping the little-endian format on a big-endian host",
            ));
        }

        let file = File::open(map.path())?;
        let mmap = unsafe { Mmap::map(&file)? };

        let mut nodes = HashMap::new();
        let mut extras = HashMap::new();
        for (key, offset) in map.directory.iter() {
            if offset < 0 || offset as usize + 8 > mmap.len() {
                return Err(Error::corruption(format!(
                    "record offset {} for key {} outside mapping of {} bytes",
                    offset,
                    key,
                    mmap.len()
                )));
            }
            let offset = offset as usize;
            if offset % 8 != 0 {
                return Err(Error::invalid_argument(format!(
                    "record for key {} at offset {} is not 8-byte aligned",
                    key, offset
                )));
            }

            let word = u64::from_le_bytes(mmap[offset..offset + 8].try_into().unwrap());
            let caplen = CapLen::unpack(word)?;
            let values_start = offset + 8;
            let values_end = values_start + caplen.length as usize * 8;
            let record_end = values_start + caplen.capacity as usize * 8;
            if record_end > mmap.len() {
                return Err(Error::corruption(format!(
                    "record for key {} extends to {} past mapping of {} bytes",
                    key,
                    record_end,
                    mmap.len()
                )));
            }

            nodes.insert(key, (values_start, caplen.length as usize));
            if record_end > values_end {
                extras.insert(key, (values_end, record_end - values_end));
            }
        }

        Ok(Self { mmap, nodes, extras })
    }

    /// The sorted values for a key, as a slice into the mapping.
    pub fn values(&self, key: u64) -> Option<&[u64]> {
        let &(offset, words) = self.nodes.get(&key)?;
        let bytes = &self.mmap[offset..offset + words * 8];
        // SAFETY: construction verified bounds and 8-byte alignment, and
        // the mapping is immutable for the life of self.
        Some(unsafe { slice::from_raw_parts(bytes.as_ptr().cast::<u64>(), words) })
    }

    /// The reserved trailing bytes of a key's record, if any.
    pub fn reserved_bytes(&self, key: u64) -> Option<&[u8]> {
        let &(offset, len) = self.extras.get(&key)?;
        Some(&self.mmap[offset..offset + len])
    }

    /// Number of keys in the mapped file.
    pub fn num_keys(&self) -> usize {
        self.nodes.len()
    }
}

impl SetRead for MmapSetMap {
    fn get(&self, key: u64) -> Option<Cow<'_, [u64]>> {
        self.values(key).map(Cow::Borrowed)
    }

    fn get_with_extra<F: FnMut(usize, &[u8])>(
        &self,
        key: u64,
        mut extra: F,
    ) -> Option<Cow<'_, [u64]>> {
        if let Some(bytes) = self.reserved_bytes(key) {
            extra(bytes.len() / 8, bytes);
        }
        self.get(key)
    }

    fn get_size(&self, key: u64) -> Option<u32> {
        self.nodes.get(&key).map(|&(_, words)| words as u32)
    }

    fn get_capacity(&self, key: u64) -> Option<u32> {
        let &(_, words) = self.nodes.get(&key)?;
        let reserved = self.extras.get(&key).map_or(0, |&(_, len)| len / 8);
        Some((words + reserved) as u32)
    }

    fn each_key<F: FnMut(u64) -> Result<()>>(&self, mut visit: F) -> Result<()> {
        for &key in self.nodes.keys() {
            visit(key)?;
        }
        Ok(())
    }
}
