//! Value cache for map lookups.
//!
//! Provides an LRU (Least Recently Used) cache to speed up repeated reads
//! of the same key's value set from the backing file.

mod lru;

pub use lru::{CacheStats, ValueCache};
