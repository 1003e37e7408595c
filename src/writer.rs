//! Mutation and commit: [`MutableMap`], per-key [`MutableKey`] handles, and
//! the packer protocol.
//!
//! A mutator stages fully-formed sorted value sequences per dirty key and
//! writes them out in one of two ways:
//!
//! - **In-place commit**: when every dirty key still fits the capacity its
//!   record reserved on disk, only the changed records are rewritten. The
//!   file size never changes and no rename is needed.
//! - **Full rewrite**: a temporary file in the same directory is built from
//!   scratch (header, two-pass directory table, records) and atomically
//!   renamed over the original. A packer decides how much growth room each
//!   record reserves.

use crate::config::{DEFAULT_CAPACITY, FILL_FACTOR};
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::format::{self, CapLen, DirEntry, Header};
use crate::reader::{SetMap, SetRead};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::Instant;
use tempfile::NamedTempFile;

/// Decides the disk layout of a record during a full-rewrite commit.
///
/// Takes the number of values in the set and returns the capacity to encode
/// into the record's caplen word together with the number of padding bytes
/// to leave after the value slots. To maintain alignment the padding should
/// be a multiple of 8.
pub type PackerFn = fn(valsize: u32) -> (u32, u32);

/// Provides application-defined bytes for a key, placed in the reserved
/// region directly after the key's values during [`MutableMap::commit_with`].
pub type ExtraFn<'e> = &'e mut dyn FnMut(u64) -> Vec<u8>;

/// Reserves no growth room at all. Produces minimum-size files.
pub fn tight_packer(valsize: u32) -> (u32, u32) {
    (valsize, 0)
}

/// Reserves enough slack that small follow-up changes can commit in place.
///
/// The capacity is `valsize + (DEFAULT_CAPACITY - FILL_FACTOR)` rounded up
/// to the next multiple of [`DEFAULT_CAPACITY`].
pub fn default_packer(valsize: u32) -> (u32, u32) {
    let bumped = valsize + (DEFAULT_CAPACITY - FILL_FACTOR);
    let capacity = DEFAULT_CAPACITY * (1 + bumped / DEFAULT_CAPACITY);
    assert!(capacity >= valsize, "packer capacity overflow");
    let pad = capacity - valsize;
    (capacity, pad * 8)
}

type DirtySet = Rc<RefCell<HashMap<u64, Vec<u64>>>>;
type HandleTable = Rc<RefCell<HashMap<u64, MutableKey>>>;

impl SetMap {
    /// Creates a mutable reference to the map.
    ///
    /// Changes become visible to readers of this map only after a
    /// successful [`commit`](MutableMap::commit). If `autosync` is true,
    /// open handles are synced automatically when commit is called;
    /// otherwise every handle must be [`sync`](MutableKey::sync)ed manually
    /// to be picked up.
    pub fn mutate(&mut self, autosync: bool) -> MutableMap<'_> {
        MutableMap {
            map: self,
            dirty: Rc::new(RefCell::new(HashMap::new())),
            handles: Rc::new(RefCell::new(HashMap::new())),
            autosync,
        }
    }
}

/// A map opened for writing.
///
/// Holds the staging area of dirty keys and the table of live edit
/// handles. Borrows the underlying [`SetMap`] exclusively: commits need to
/// reopen its descriptor and refresh its directory and cache.
pub struct MutableMap<'a> {
    map: &'a mut SetMap,
    /// Keys with fully-formed new value sequences awaiting commit.
    dirty: DirtySet,
    /// Live handles, shared with the [`MutableKey`] clones handed out.
    handles: HandleTable,
    autosync: bool,
}

impl MutableMap<'_> {
    /// Returns the values for the given key, preferring any staged,
    /// uncommitted sequence over the committed state.
    pub fn get(&self, key: u64) -> Option<Vec<u64>> {
        if let Some(values) = self.dirty.borrow().get(&key) {
            return Some(values.clone());
        }
        self.map.get(key).map(Cow::into_owned)
    }

    /// Returns the value set for the given key, preferring any staged,
    /// uncommitted sequence over the committed state.
    pub fn get_set(&self, key: u64) -> Option<HashSet<u64>> {
        if let Some(values) = self.dirty.borrow().get(&key) {
            return Some(values.iter().copied().collect());
        }
        self.map.get_set(key)
    }

    /// Opens a key for editing.
    ///
    /// Idempotent: a second open of the same key returns the same live
    /// handle. A fresh handle is seeded from the staging area if the key is
    /// dirty, else from disk, else empty.
    pub fn open_key(&mut self, key: u64) -> MutableKey {
        if let Some(handle) = self.handles.borrow().get(&key) {
            return handle.clone();
        }

        let seed: HashSet<u64> = if let Some(values) = self.dirty.borrow().get(&key) {
            values.iter().copied().collect()
        } else if let Some(set) = self.map.get_set(key) {
            set
        } else {
            HashSet::with_capacity(DEFAULT_CAPACITY as usize)
        };

        let handle = MutableKey {
            key,
            vals: Rc::new(RefCell::new(seed)),
            synced: Rc::new(Cell::new(true)),
            dirty: Rc::clone(&self.dirty),
            handles: Rc::downgrade(&self.handles),
        };
        self.handles.borrow_mut().insert(key, handle.clone());
        handle
    }

    /// Writes the staged changes to disk.
    ///
    /// If `packed` is true the file is rewritten with no growth room, which
    /// minimizes its size. Otherwise an in-place commit is attempted first
    /// (using capacity reserved by a previous unpacked commit) and a full
    /// rewrite with [`default_packer`] is the fallback.
    ///
    /// With autosync enabled, unsynced handles are flushed first and a
    /// commit with nothing staged does nothing. The mutator can be reused
    /// immediately after a successful commit.
    pub fn commit(&mut self, packed: bool) -> Result<()> {
        if self.autosync {
            self.flush_handles();
            if self.dirty.borrow().is_empty() {
                // nothing to write
                return Ok(());
            }
        }

        if packed {
            return self.commit_with(tight_packer, None);
        }

        if self.inplace_commit() {
            return Ok(());
        }
        self.commit_with(default_packer, None)
    }

    /// Full-rewrite commit with a caller-chosen packer and optional extra
    /// per-key bytes emitted into each record's reserved region.
    ///
    /// Files written with a custom packer should not be modified unless the
    /// packer's layout is understood. During the rename-replace step the
    /// previous file briefly exists as `<name>.old`.
    pub fn commit_with(&mut self, packer: PackerFn, mut extra: Option<ExtraFn<'_>>) -> Result<()> {
        if self.autosync {
            self.flush_handles();
            if self.dirty.borrow().is_empty() {
                return Ok(());
            }
        }

        if self.map.directory.is_shifted() {
            // a rewrite under a shift would need to scan the whole backing
            // file to recover exact keys; repack in exact mode instead
            return Err(Error::not_implemented("full rewrite of a shifted map"));
        }

        // the commit owns the file from here; readers reopen lazily after
        self.map.release_backing();

        let mut old = match File::open(&self.map.path) {
            Ok(f) => Some(f),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let parent = match self.map.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        // keep() right away: a failed rewrite leaves the temp file behind
        // for inspection instead of quietly unlinking it
        let (mut newf, temp_path) = NamedTempFile::new_in(parent)?
            .keep()
            .map_err(|e| Error::Io(e.error))?;

        Header { sidecar: self.map.sidecar.clone() }.write_to(&mut newf)?;

        let dirty = self.dirty.borrow();
        let mut keys: Vec<u64> = self.map.directory.keys().collect();
        keys.extend(dirty.keys().copied().filter(|k| !self.map.directory.contains(*k)));
        keys.sort_unstable();

        format::write_u64(&mut newf, keys.len() as u64)?;
        for &key in &keys {
            // placeholder offsets, fixed up once the records are written
            DirEntry { key, offset: 0 }.write_to(&mut newf)?;
        }

        let mut offset = newf.stream_position()? as i64;
        let mut new_offsets: HashMap<u64, i64> = HashMap::with_capacity(keys.len());
        {
            let mut w = BufWriter::with_capacity(8 << 20, &mut newf);
            for &key in &keys {
                new_offsets.insert(key, offset);

                let copied;
                let values: &[u64] = match dirty.get(&key) {
                    Some(values) => values,
                    None => {
                        // copy the record through from the old file,
                        // truncated to its used length
                        let oldf = old.as_mut().ok_or_else(|| {
                            Error::corruption(format!("no backing file to copy key {} from", key))
                        })?;
                        let Some(prior) = self.map.directory.offset_of(key) else {
                            return Err(Error::corruption(format!(
                                "key {} has no committed offset",
                                key
                            )));
                        };
                        oldf.seek(SeekFrom::Start(prior as u64))?;
                        let caplen = CapLen::read_from(oldf)?;
                        copied = read_values_from(oldf, caplen.length)?;
                        &copied
                    }
                };

                let valsize = values.len() as u32;
                let (capacity, mut pad) = packer(valsize);
                if capacity < valsize {
                    return Err(Error::invalid_argument(format!(
                        "packer reserved {} slots for {} values",
                        capacity, valsize
                    )));
                }

                CapLen::new(capacity, valsize).write_to(&mut w)?;
                for &v in values {
                    format::write_u64(&mut w, v)?;
                }
                offset += 8 + 8 * values.len() as i64;

                if pad > 0 {
                    if let Some(extra_fn) = extra.as_mut() {
                        let edata = extra_fn(key);
                        if !edata.is_empty() {
                            if edata.len() as u32 > pad {
                                return Err(Error::invalid_argument(format!(
                                    "extra data of {} bytes exceeds the {} pad bytes of key {}",
                                    edata.len(),
                                    pad,
                                    key
                                )));
                            }
                            w.write_all(&edata)?;
                            offset += edata.len() as i64;
                            pad -= edata.len() as u32;
                        }
                    }
                }
                if pad > 0 {
                    w.write_all(&vec![0u8; pad as usize])?;
                    offset += pad as i64;
                }
            }
            w.flush()?;
        }

        // second pass: jump back to the table and write the real offsets
        newf.seek(SeekFrom::Start(format::directory_start(self.map.sidecar.len())))?;
        for &key in &keys {
            DirEntry { key, offset: new_offsets[&key] }.write_to(&mut newf)?;
        }
        drop(newf);
        drop(old);

        self.replace_backing_file(&temp_path)?;

        // move the new state into the map so it can be used immediately
        drop(dirty);
        self.map.directory = Directory::from_offsets(
            new_offsets,
            format::directory_start(self.map.sidecar.len()),
        );
        let mut cache = self.map.cache.borrow_mut();
        for (key, values) in self.dirty.borrow_mut().drain() {
            cache.insert(key, values);
        }
        Ok(())
    }

    /// Rename-replaces the live file with the finished temp file, keeping
    /// the previous content as `<name>.old` until the swap succeeds.
    fn replace_backing_file(&self, temp_path: &Path) -> Result<()> {
        let path = &self.map.path;
        let shadow = old_shadow_path(path);
        let had_old = path.exists();
        if had_old {
            fs::rename(path, &shadow)?;
        }

        if let Err(rename_err) = fs::rename(temp_path, path) {
            // rename cannot cross filesystems; degrade to a copy-through
            log::warn!(
                "rename {:?} -> {:?} failed ({}), copying instead",
                temp_path,
                path,
                rename_err
            );
            let started = Instant::now();
            fs::copy(temp_path, path)?;
            if let Err(e) = fs::remove_file(temp_path) {
                log::warn!("removing {:?}: {}", temp_path, e);
            }
            log::info!("took {:?} to copy the commit across filesystems", started.elapsed());
        }

        if had_old {
            if let Err(e) = fs::remove_file(&shadow) {
                log::warn!("removing {:?}: {}", shadow, e);
            }
        }
        Ok(())
    }

    /// Tries to land every dirty key inside its record's reserved capacity
    /// without rewriting the file. Returns true on success; any failed
    /// check or write falls back to the full rewrite.
    fn inplace_commit(&mut self) -> bool {
        let dirty = self.dirty.borrow();

        // first pass: every dirty key must already exist and fit
        let fits = self.map.with_backing(|file, directory| {
            for (&key, values) in dirty.iter() {
                let Some(offset) = directory.resolve(file, key)? else {
                    return Ok(false);
                };
                file.seek(SeekFrom::Start(offset as u64))?;
                let caplen = CapLen::read_from(file)?;
                if (caplen.capacity as usize) < values.len() {
                    // will not fit without a resize
                    return Ok(false);
                }
            }
            Ok(true)
        });
        match fits {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                if !matches!(&e, Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound) {
                    log::warn!("in-place commit precheck: {}", e);
                }
                return false;
            }
        }

        // passed the checks; reopen the backing file for writing
        self.map.release_backing();
        let mut file = match OpenOptions::new().read(true).write(true).open(&self.map.path) {
            Ok(f) => f,
            Err(e) => {
                log::warn!("reopening {:?} for in-place commit: {}", self.map.path, e);
                return false;
            }
        };

        for (&key, values) in dirty.iter() {
            if let Err(e) = write_record_in_place(&mut file, &self.map.directory, key, values) {
                log::warn!("in-place commit of key {}: {}", key, e);
                return false;
            }
        }
        drop(dirty);

        // every write landed; publish to the cache and clear the staging
        let mut cache = self.map.cache.borrow_mut();
        for (key, values) in self.dirty.borrow_mut().drain() {
            cache.insert(key, values);
        }
        true
    }

    /// Syncs every unsynced handle and clears the handle table.
    fn flush_handles(&mut self) {
        for (_, handle) in self.handles.borrow_mut().drain() {
            if !handle.synced.get() {
                handle.sync();
            }
        }
    }
}

/// Overwrites one record's used slots, fixing the caplen length when it
/// changed. The capacity precheck has already passed.
fn write_record_in_place(
    file: &mut File,
    directory: &Directory,
    key: u64,
    values: &[u64],
) -> Result<()> {
    let Some(offset) = directory.resolve(file, key)? else {
        return Err(Error::corruption(format!(
            "key {} vanished during in-place commit",
            key
        )));
    };
    file.seek(SeekFrom::Start(offset as u64))?;
    let caplen = CapLen::read_from(file)?;
    if caplen.length as usize != values.len() {
        file.seek(SeekFrom::Current(-8))?;
        CapLen::new(caplen.capacity, values.len() as u32).write_to(file)?;
    }
    for &v in values {
        format::write_u64(file, v)?;
    }
    Ok(())
}

/// Reads `length` value slots from the current position of the old file.
fn read_values_from(file: &mut File, length: u32) -> Result<Vec<u64>> {
    use std::io::Read;
    let mut buf = vec![0u8; length as usize * 8];
    file.read_exact(&mut buf)?;
    Ok(format::decode_values(&buf))
}

fn old_shadow_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".old");
    PathBuf::from(os)
}

/// A key open for editing its value set.
///
/// Changes accumulate in a hashed set and reach the mutator's staging area
/// only on [`sync`](MutableKey::sync). Handles are cheap clones of shared
/// state: opening the same key twice yields the same underlying set.
#[derive(Clone)]
pub struct MutableKey {
    key: u64,
    vals: Rc<RefCell<HashSet<u64>>>,
    synced: Rc<Cell<bool>>,
    dirty: DirtySet,
    handles: Weak<RefCell<HashMap<u64, MutableKey>>>,
}

impl MutableKey {
    /// The key under edit.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Adds a value to the key's set.
    pub fn put(&self, val: u64) {
        self.vals.borrow_mut().insert(val);
        self.synced.set(false);
    }

    /// Adds every value of `vals` to the key's set.
    pub fn put_many(&self, vals: impl IntoIterator<Item = u64>) {
        let mut set = self.vals.borrow_mut();
        for val in vals {
            set.insert(val);
        }
        self.synced.set(false);
    }

    /// Removes a value from the key's set.
    pub fn remove(&self, val: u64) {
        self.vals.borrow_mut().remove(&val);
        self.synced.set(false);
    }

    /// Removes every value of `vals` from the key's set.
    pub fn remove_many(&self, vals: impl IntoIterator<Item = u64>) {
        let mut set = self.vals.borrow_mut();
        for val in vals {
            set.remove(&val);
        }
        self.synced.set(false);
    }

    /// Empties the key's set.
    pub fn clear(&self) {
        let mut set = self.vals.borrow_mut();
        if !set.is_empty() {
            set.clear();
            self.synced.set(false);
        }
    }

    /// Stages the handle's current values for commit by writing the sorted,
    /// deduplicated sequence into the mutator's staging area.
    ///
    /// The handle stays usable afterwards, but it only reflects its own
    /// edits, not changes made through other handles since it was opened.
    pub fn sync(&self) {
        let mut values: Vec<u64> = self.vals.borrow().iter().copied().collect();
        values.sort_unstable();
        self.dirty.borrow_mut().insert(self.key, values);
        self.synced.set(true);
    }

    /// Drops the handle and releases its memory without staging anything.
    pub fn discard(self) {
        if let Some(handles) = self.handles.upgrade() {
            handles.borrow_mut().remove(&self.key);
        }
        self.vals.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tight_packer() {
        assert_eq!(tight_packer(0), (0, 0));
        assert_eq!(tight_packer(7), (7, 0));
        assert_eq!(tight_packer(1000), (1000, 0));
    }

    #[test]
    fn test_default_packer_rounds_to_capacity() {
        // below the fill cutoff stays within one bucket
        assert_eq!(default_packer(23), (32, 9 * 8));
        // at the cutoff the next bucket is reserved
        assert_eq!(default_packer(24), (64, 40 * 8));
        assert_eq!(default_packer(0), (32, 32 * 8));
        assert_eq!(default_packer(32), (64, 32 * 8));
    }

    #[test]
    fn test_open_key_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut map = SetMap::open(dir.path().join("edit.8sm")).unwrap();
        let mut mm = map.mutate(false);

        let h1 = mm.open_key(1);
        h1.put(10);
        let h2 = mm.open_key(1);
        // both handles edit the same set
        h2.put(20);
        h1.sync();

        assert_eq!(mm.get(1), Some(vec![10, 20]));
    }

    #[test]
    fn test_unsynced_edits_are_not_staged() {
        let dir = TempDir::new().unwrap();
        let mut map = SetMap::open(dir.path().join("edit.8sm")).unwrap();
        let mut mm = map.mutate(false);

        let handle = mm.open_key(1);
        handle.put(10);
        assert_eq!(mm.get(1), None);

        handle.sync();
        assert_eq!(mm.get(1), Some(vec![10]));
    }

    #[test]
    fn test_discard_releases_handle() {
        let dir = TempDir::new().unwrap();
        let mut map = SetMap::open(dir.path().join("edit.8sm")).unwrap();
        let mut mm = map.mutate(false);

        let handle = mm.open_key(1);
        handle.put(10);
        handle.discard();

        // the next open starts fresh
        let handle = mm.open_key(1);
        handle.sync();
        assert_eq!(mm.get(1), Some(vec![]));
    }

    #[test]
    fn test_autosync_commit_with_no_changes_is_noop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("noop.8sm");
        let mut map = SetMap::open(&path).unwrap();
        let mut mm = map.mutate(true);

        mm.commit(false).unwrap();
        // no file is created when there was nothing to write
        assert!(!path.exists());
    }
}
