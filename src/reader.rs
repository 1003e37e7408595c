//! The seek-based reader: [`SetMap`] and the shared [`SetRead`] surface.
//!
//! A `SetMap` keeps the whole key directory in memory and nothing else; a
//! lookup seeks to the key's record, decodes the used value slots, and
//! caches the result. The backing descriptor is opened lazily on the first
//! read and reused until a commit needs the file back.

use crate::cache::{CacheStats, ValueCache};
use crate::config::Options;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::format::{decode_values, CapLen};
use bytes::Bytes;
use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, Read as _, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// The read surface shared by the seek-based and memory-mapped readers.
///
/// A missing key is reported as `None`, never as an error. Read failures
/// are logged and reported as missing; only opening a structurally invalid
/// file fails loudly.
pub trait SetRead {
    /// Returns the sorted values for the given key.
    fn get(&self, key: u64) -> Option<Cow<'_, [u64]>>;

    /// Returns the values for the given key as an unordered membership set.
    fn get_set(&self, key: u64) -> Option<HashSet<u64>> {
        self.get(key).map(|values| values.iter().copied().collect())
    }

    /// Like [`get`](SetRead::get), but additionally hands `extra` the
    /// record's reserved trailing region: the slot count and a view of the
    /// `(capacity - length) * 8` bytes past the used values. The visitor is
    /// only invoked when the region is nonempty.
    fn get_with_extra<F: FnMut(usize, &[u8])>(&self, key: u64, extra: F) -> Option<Cow<'_, [u64]>>;

    /// Returns the number of values stored for the given key, from the
    /// record's caplen word alone.
    fn get_size(&self, key: u64) -> Option<u32>;

    /// Returns the capacity reserved for the given key, from the record's
    /// caplen word alone.
    fn get_capacity(&self, key: u64) -> Option<u32>;

    /// Calls `visit` for every key in the map until it returns an error.
    ///
    /// Keys are visited in no particular order.
    fn each_key<F: FnMut(u64) -> Result<()>>(&self, visit: F) -> Result<()>;
}

/// An out-of-core map from u64 keys to sorted sets of u64 values.
///
/// Reads resolve through the in-memory [`Directory`] and seek into the
/// backing file; mutation goes through [`mutate`](SetMap::mutate).
#[derive(Debug)]
pub struct SetMap {
    pub(crate) path: PathBuf,
    /// Read-only descriptor, opened lazily and released around commits.
    pub(crate) file: RefCell<Option<File>>,
    pub(crate) directory: Directory,
    pub(crate) cache: RefCell<ValueCache>,
    pub(crate) sidecar: Bytes,
}

impl SetMap {
    /// Opens the map backed by the (possibly empty or missing) file at
    /// `path`, in exact mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, Options::default())
    }

    /// Opens the map with truncated directory keys.
    ///
    /// A shift is a power-of-two factor: `shift = 1` roughly halves
    /// directory memory but each lookup takes an extra bounded scan of the
    /// on-disk entry table. Requires the file's directory to be sorted.
    pub fn open_shifted(path: impl AsRef<Path>, shift: u32) -> Result<Self> {
        Self::open_with(path, Options::shifted(shift))
    }

    /// Opens the map with explicit options.
    pub fn open_with(path: impl AsRef<Path>, options: Options) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let (directory, sidecar) = match File::open(&path) {
            Ok(file) => {
                if file.metadata()?.len() == 0 {
                    (Directory::empty(options.shift), Bytes::new())
                } else {
                    let mut reader = BufReader::new(file);
                    let (directory, header) = Directory::load(&mut reader, options.shift)?;
                    (directory, header.sidecar)
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                (Directory::empty(options.shift), Bytes::new())
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            file: RefCell::new(None),
            directory,
            cache: RefCell::new(ValueCache::new(options.cache_capacity)),
            sidecar,
        })
    }

    /// The backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The active directory shift.
    pub fn shift(&self) -> u32 {
        self.directory.shift()
    }

    /// The opaque sidecar bytes embedded in the file.
    pub fn sidecar(&self) -> &Bytes {
        &self.sidecar
    }

    /// Replaces the sidecar bytes. The change is persisted by the next
    /// full-rewrite commit.
    pub fn set_sidecar(&mut self, sidecar: impl Into<Bytes>) {
        self.sidecar = sidecar.into();
    }

    /// A snapshot of the value cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.borrow().stats()
    }

    /// Runs `op` against the lazily opened read descriptor.
    pub(crate) fn with_backing<T>(
        &self,
        op: impl FnOnce(&mut File, &Directory) -> Result<T>,
    ) -> Result<T> {
        let mut cell = self.file.borrow_mut();
        if cell.is_none() {
            *cell = Some(File::open(&self.path)?);
        }
        op(cell.as_mut().unwrap(), &self.directory)
    }

    /// Drops the read descriptor so a commit can reopen the file.
    pub(crate) fn release_backing(&self) {
        self.file.borrow_mut().take();
    }

    fn values_from_backing(&self, key: u64) -> Result<Option<Vec<u64>>> {
        self.with_backing(|file, directory| {
            let Some(offset) = directory.resolve(file, key)? else {
                return Ok(None);
            };
            file.seek(SeekFrom::Start(offset as u64))?;
            let caplen = CapLen::read_from(file)?;
            Ok(Some(read_values(file, caplen.length)?))
        })
    }

    fn caplen_from_backing(&self, key: u64) -> Result<Option<CapLen>> {
        self.with_backing(|file, directory| {
            let Some(offset) = directory.resolve(file, key)? else {
                return Ok(None);
            };
            file.seek(SeekFrom::Start(offset as u64))?;
            Ok(Some(CapLen::read_from(file)?))
        })
    }
}

/// Reads `length` value slots from the current position.
fn read_values(file: &mut File, length: u32) -> Result<Vec<u64>> {
    if length == 0 {
        return Ok(Vec::new());
    }
    let mut buf = vec![0u8; length as usize * 8];
    file.read_exact(&mut buf).map_err(eof_is_corruption)?;
    Ok(decode_values(&buf))
}

/// A record that runs past the end of the file is corruption, not a short
/// read to be retried.
fn eof_is_corruption(err: io::Error) -> Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        Error::corruption("record extends past end of file")
    } else {
        Error::Io(err)
    }
}

/// Logs a read-path failure. Lookups soft-fail as "not found": a missing
/// backing file is an empty map, plain I/O trouble is worth a warning, and
/// a structural violation is an error either way.
fn log_read_failure(key: u64, err: &Error) {
    match err {
        Error::Io(e) if e.kind() == io::ErrorKind::NotFound => {}
        Error::Corruption(_) => log::error!("reading key {}: {}", key, err),
        _ => log::warn!("reading key {}: {}", key, err),
    }
}

impl SetRead for SetMap {
    fn get(&self, key: u64) -> Option<Cow<'_, [u64]>> {
        if let Some(values) = self.cache.borrow_mut().get(key) {
            return Some(Cow::Owned(values));
        }
        match self.values_from_backing(key) {
            Ok(Some(values)) => {
                if !values.is_empty() {
                    self.cache.borrow_mut().insert(key, values.clone());
                }
                Some(Cow::Owned(values))
            }
            Ok(None) => None,
            Err(e) => {
                log_read_failure(key, &e);
                None
            }
        }
    }

    fn get_with_extra<F: FnMut(usize, &[u8])>(
        &self,
        key: u64,
        mut extra: F,
    ) -> Option<Cow<'_, [u64]>> {
        let result = self.with_backing(|file, directory| {
            let Some(offset) = directory.resolve(file, key)? else {
                return Ok(None);
            };
            file.seek(SeekFrom::Start(offset as u64))?;
            let caplen = CapLen::read_from(file)?;
            let values = read_values(file, caplen.length)?;

            let reserved = caplen.reserved() as usize * 8;
            if reserved > 0 {
                let mut buf = vec![0u8; reserved];
                file.read_exact(&mut buf).map_err(eof_is_corruption)?;
                extra(reserved / 8, &buf);
            }
            Ok(Some(values))
        });
        match result {
            Ok(Some(values)) => {
                if !values.is_empty() {
                    self.cache.borrow_mut().insert(key, values.clone());
                }
                Some(Cow::Owned(values))
            }
            Ok(None) => None,
            Err(e) => {
                log_read_failure(key, &e);
                None
            }
        }
    }

    fn get_size(&self, key: u64) -> Option<u32> {
        match self.caplen_from_backing(key) {
            Ok(caplen) => caplen.map(|c| c.length),
            Err(e) => {
                log_read_failure(key, &e);
                None
            }
        }
    }

    fn get_capacity(&self, key: u64) -> Option<u32> {
        match self.caplen_from_backing(key) {
            Ok(caplen) => caplen.map(|c| c.capacity),
            Err(e) => {
                log_read_failure(key, &e);
                None
            }
        }
    }

    fn each_key<F: FnMut(u64) -> Result<()>>(&self, mut visit: F) -> Result<()> {
        if self.directory.is_shifted() {
            // ordering the truncated directory cannot recover original keys
            // without a full scan of the on-disk table
            return Err(Error::not_implemented(
                "key enumeration over a shifted directory",
            ));
        }
        for key in self.directory.keys() {
            visit(key)?;
        }
        Ok(())
    }
}
