// The zero-copy reader over committed files, including the reserved-region
// visitor surface shared with the seek-based reader.

use eightsetmap::{MmapSetMap, SetMap, SetRead, DEFAULT_CAPACITY};
use tempfile::TempDir;

fn build_map(path: &std::path::Path, packed: bool) -> SetMap {
    let mut map = SetMap::open(path).unwrap();
    {
        let mut mm = map.mutate(false);
        for key in [3u64, 8, 21] {
            let mk = mm.open_key(key);
            mk.put_many(0..key);
            mk.sync();
        }
        mm.commit(packed).unwrap();
    }
    map
}

#[test]
fn test_mmap_reads_match_seek_reads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mapped.8sm");
    let map = build_map(&path, false);
    let mapped = MmapSetMap::new(&map).unwrap();

    assert_eq!(mapped.num_keys(), 3);
    for key in [3u64, 8, 21] {
        let expected: Vec<u64> = (0..key).collect();
        assert_eq!(mapped.values(key).unwrap(), expected.as_slice());
        assert_eq!(mapped.get(key).unwrap().as_ref(), expected.as_slice());
        assert_eq!(map.get(key).unwrap(), mapped.get(key).unwrap());
        assert_eq!(mapped.get_size(key), Some(key as u32));
    }
    assert!(mapped.get(4).is_none());
    assert_eq!(mapped.get_size(4), None);

    let set = mapped.get_set(8).unwrap();
    assert_eq!(set.len(), 8);
    assert!(set.contains(&7));
}

#[test]
fn test_mmap_capacity_includes_reserved_region() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mapped.8sm");
    let map = build_map(&path, false);
    let mapped = MmapSetMap::new(&map).unwrap();

    // an unpacked commit reserves growth room past the used slots
    assert_eq!(mapped.get_capacity(3), Some(DEFAULT_CAPACITY));
    assert_eq!(mapped.get_capacity(21), Some(DEFAULT_CAPACITY));
    assert_eq!(map.get_capacity(3), mapped.get_capacity(3));

    // and the reserved bytes are zero until an extra callback fills them
    let mut visited = None;
    let _ = mapped.get_with_extra(3, |n, bytes| {
        visited = Some((n, bytes.to_vec()));
    });
    let (n, bytes) = visited.unwrap();
    assert_eq!(n, (DEFAULT_CAPACITY - 3) as usize);
    assert!(bytes.iter().all(|&b| b == 0));
}

#[test]
fn test_mmap_packed_file_has_no_reserved_region() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("packed.8sm");
    let map = build_map(&path, true);
    let mapped = MmapSetMap::new(&map).unwrap();

    assert_eq!(mapped.get_capacity(8), Some(8));
    assert!(mapped.reserved_bytes(8).is_none());

    let mut called = false;
    let values = mapped.get_with_extra(8, |_, _| called = true).unwrap();
    assert!(!called, "no reserved region to visit in a packed file");
    assert_eq!(values.as_ref(), (0..8).collect::<Vec<u64>>().as_slice());
}

#[test]
fn test_extra_bytes_round_trip_through_both_readers() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("extra.8sm");

    let mut map = SetMap::open(&path).unwrap();
    {
        let mut mm = map.mutate(false);
        for key in [5u64, 9] {
            let mk = mm.open_key(key);
            mk.put_many(0..key);
            mk.sync();
        }
        let mut tag = |key: u64| key.to_le_bytes().to_vec();
        mm.commit_with(eightsetmap::default_packer, Some(&mut tag)).unwrap();
    }

    // the first reserved word of each record carries the key tag
    let check = |label: &str, get: &dyn Fn(u64, &mut dyn FnMut(usize, &[u8]))| {
        for key in [5u64, 9] {
            let mut first_word = None;
            let mut words = 0;
            get(key, &mut |n, bytes| {
                words = n;
                first_word = Some(u64::from_le_bytes(bytes[..8].try_into().unwrap()));
            });
            assert_eq!(first_word, Some(key), "{} reader extra for key {}", label, key);
            assert_eq!(words, (DEFAULT_CAPACITY - key as u32) as usize);
        }
    };

    check("seek", &|key, visit| {
        let _ = map.get_with_extra(key, |n, bytes| visit(n, bytes));
    });

    let mapped = MmapSetMap::new(&map).unwrap();
    check("mmap", &|key, visit| {
        let _ = mapped.get_with_extra(key, |n, bytes| visit(n, bytes));
    });
}

#[test]
fn test_mmap_each_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("mapped.8sm");
    let map = build_map(&path, true);
    let mapped = MmapSetMap::new(&map).unwrap();

    let mut seen = Vec::new();
    mapped
        .each_key(|k| {
            seen.push(k);
            Ok(())
        })
        .unwrap();
    seen.sort_unstable();
    assert_eq!(seen, vec![3, 8, 21]);
}
