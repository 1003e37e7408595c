//! Sorted-set algebra over map keys.
//!
//! All operations are single linear merge walks over sorted, duplicate-free
//! sequences, independent of how the map stores them. The multi-key
//! variants sort their inputs by size so the folds do the least work.

use crate::reader::SetRead;

/// Merge-union of two sorted, duplicate-free sequences.
pub fn merge_union(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() || j < b.len() {
        if i == a.len() {
            out.push(b[j]);
            j += 1;
        } else if j == b.len() {
            out.push(a[i]);
            i += 1;
        } else if a[i] <= b[j] {
            out.push(a[i]);
            if a[i] == b[j] {
                j += 1;
            }
            i += 1;
        } else {
            out.push(b[j]);
            j += 1;
        }
    }
    out
}

/// Merge-intersection of two sorted, duplicate-free sequences.
pub fn merge_intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            if a[i] == b[j] {
                out.push(a[i]);
                j += 1;
            }
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Merge-difference `a \ b` of two sorted, duplicate-free sequences.
pub fn merge_difference(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut out = Vec::with_capacity(a.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() {
        if j == b.len() || a[i] < b[j] {
            out.push(a[i]);
            i += 1;
        } else if a[i] == b[j] {
            // match, drop it
            i += 1;
            j += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Returns the set of unique values associated to either `k1` or `k2`.
///
/// A missing key acts as the empty set.
pub fn union<M: SetRead>(m: &M, k1: u64, k2: u64) -> Vec<u64> {
    let Some(v1) = m.get(k1) else {
        return m.get(k2).map(|v| v.into_owned()).unwrap_or_default();
    };
    let Some(v2) = m.get(k2) else {
        return v1.into_owned();
    };
    merge_union(&v1, &v2)
}

/// Returns the set of values associated to both `k1` and `k2`.
///
/// If either key is missing the result is empty.
pub fn intersect<M: SetRead>(m: &M, k1: u64, k2: u64) -> Vec<u64> {
    let Some(v1) = m.get(k1) else { return Vec::new() };
    let Some(v2) = m.get(k2) else { return Vec::new() };
    merge_intersect(&v1, &v2)
}

/// Returns `k1`'s values with any value also found under `k2` removed.
///
/// A missing `k1` yields the empty set; a missing `k2` leaves `k1` intact.
pub fn difference<M: SetRead>(m: &M, k1: u64, k2: u64) -> Vec<u64> {
    let Some(v1) = m.get(k1) else { return Vec::new() };
    let Some(v2) = m.get(k2) else { return v1.into_owned() };
    merge_difference(&v1, &v2)
}

/// Returns the set of unique values associated to any of the given keys.
///
/// Missing and empty keys are skipped; no keys yields the empty set.
pub fn multi_union<M: SetRead>(m: &M, keys: &[u64]) -> Vec<u64> {
    let mut sets = collect_sets(m, keys);
    if sets.is_empty() {
        return Vec::new();
    }
    // fold the smaller sets into the largest base
    let mut out = sets.pop().unwrap();
    for set in &sets {
        out = merge_union(&out, set);
    }
    out
}

/// Returns the set of values associated to all of the given keys.
///
/// If any key is missing, or any pair has no intersection, the result is
/// empty; so is the result for no keys at all.
pub fn multi_intersect<M: SetRead>(m: &M, keys: &[u64]) -> Vec<u64> {
    if keys.is_empty() {
        return Vec::new();
    }
    let sets = collect_sets(m, keys);
    if sets.len() != keys.len() {
        // a missing or empty key makes the whole intersection empty
        return Vec::new();
    }
    let mut iter = sets.into_iter();
    let mut out = iter.next().unwrap();
    for set in iter {
        out = merge_intersect(&out, &set);
        if out.is_empty() {
            return Vec::new();
        }
    }
    out
}

/// Fetches present, nonempty sets for the keys, sorted by size ascending.
fn collect_sets<M: SetRead>(m: &M, keys: &[u64]) -> Vec<Vec<u64>> {
    let mut sets: Vec<Vec<u64>> = keys
        .iter()
        .filter_map(|&k| m.get(k))
        .filter(|v| !v.is_empty())
        .map(|v| v.into_owned())
        .collect();
    sets.sort_by_key(|v| v.len());
    sets
}
