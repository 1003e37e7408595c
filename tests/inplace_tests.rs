// The in-place commit oracle: an unpacked commit whose dirty keys all fit
// their reserved capacity must not change the file size; growing past the
// capacity must.

use eightsetmap::{SetMap, SetRead, DEFAULT_CAPACITY, FILL_FACTOR};
use rand::Rng;
use std::fs;
use std::path::Path;

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

#[test]
fn test_inplace_commit_preserves_file_size() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("inplace_testing.8sm");
    let mut rng = rand::thread_rng();

    let just_under = (FILL_FACTOR - 1) as usize;

    // seed four keys, each under the fill cutoff, with an unpacked commit
    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(false);
        let mk1 = mm.open_key(42);
        let mk2 = mm.open_key(43);
        let mk3 = mm.open_key(44);
        let mk4 = mm.open_key(45);
        for i in 0..just_under {
            mk1.put(42); // collapses to a single value
            mk2.put(42 * i as u64); // distinct multiples
            mk3.put(i as u64); // dense sequence
            mk4.put(rng.gen()); // not in sequence
        }
        mk1.sync();
        mk2.sync();
        mk3.sync();
        mk4.sync();
        mm.commit(false).unwrap();
    }

    assert_eq!(map.get(42).unwrap().len(), 1);
    for k in [43u64, 44, 45] {
        assert_eq!(map.get(k).unwrap().len(), just_under, "key {}", k);
    }
    let sz = file_size(&path);

    // a fresh instance adds a few values; all fit, so the size must hold
    let to_add = 1 + ((DEFAULT_CAPACITY - FILL_FACTOR) / 2) as usize;
    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(false);
        let mk1 = mm.open_key(42);
        let mk2 = mm.open_key(43);
        let mk3 = mm.open_key(44);
        let mk4 = mm.open_key(45);
        for i in 0..to_add {
            mk1.put(42);
            mk2.put(42 * i as u64); // duplicate of existing
            mk3.put((just_under + i) as u64); // new value in sequence
            mk4.put(rng.gen());
        }
        mk1.sync();
        mk2.sync();
        mk3.sync();
        mk4.sync();
        mm.commit(false).unwrap();
    }

    assert_eq!(map.get(42).unwrap().len(), 1);
    assert_eq!(map.get(43).unwrap().len(), just_under);
    assert_eq!(map.get(44).unwrap().len(), just_under + to_add);
    let k4_size = map.get(45).unwrap().len();
    assert!(k4_size > just_under);
    assert_eq!(file_size(&path), sz, "in-place add changed the file size");

    // removing values also lands in place
    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(false);
        let mk2 = mm.open_key(43);
        let mk3 = mm.open_key(44);
        let mk4 = mm.open_key(45);
        for i in 0..to_add {
            mk2.remove(42 * i as u64);
            mk3.remove((just_under + i) as u64);
            mk4.remove(rng.gen()); // almost surely absent
        }
        mk2.sync();
        mk3.sync();
        mk4.sync();
        mm.commit(false).unwrap();
    }

    assert_eq!(map.get(42).unwrap().len(), 1);
    assert_eq!(map.get(43).unwrap().len(), just_under - to_add);
    assert_eq!(map.get(44).unwrap().len(), just_under);
    assert_eq!(map.get(45).unwrap().len(), k4_size);
    assert_eq!(file_size(&path), sz, "in-place remove changed the file size");

    // blowing far past the reserved capacity forces a rewrite
    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(false);
        let mk4 = mm.open_key(45);
        for _ in 0..(99 * DEFAULT_CAPACITY) {
            mk4.put(rng.gen());
        }
        mk4.sync();
        mm.commit(false).unwrap();
    }

    assert_eq!(map.get(42).unwrap().len(), 1);
    assert_eq!(map.get(43).unwrap().len(), just_under - to_add);
    assert_eq!(map.get(44).unwrap().len(), just_under);
    assert!(map.get(45).unwrap().len() > k4_size);
    assert!(
        file_size(&path) > sz,
        "file should have grown past its reserved capacity"
    );
}

#[test]
fn test_inplace_shrinks_length_not_capacity() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("shrink.8sm");

    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(true);
        mm.open_key(7).put_many(0..20);
        mm.commit(false).unwrap();
    }
    assert_eq!(map.get_size(7), Some(20));
    assert_eq!(map.get_capacity(7), Some(DEFAULT_CAPACITY));

    {
        let mut mm = map.mutate(true);
        mm.open_key(7).remove_many(10..20);
        mm.commit(false).unwrap();
    }
    // the record keeps its reserved slots, only the length shrinks
    assert_eq!(map.get_size(7), Some(10));
    assert_eq!(map.get_capacity(7), Some(DEFAULT_CAPACITY));
    assert_eq!(map.get(7).unwrap().as_ref(), (0..10).collect::<Vec<_>>().as_slice());
}
