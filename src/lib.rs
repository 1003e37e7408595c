//! # eightsetmap - an out-of-core map from u64 keys to sorted u64 sets
//!
//! eightsetmap is a hyper-specialized persistent `map[u64] -> sorted
//! set of u64` that keeps its data on disk and only the key directory in
//! memory. On a machine with 16G of RAM it can serve an index whose naive
//! in-memory form would take 64G: value sets are materialized on demand
//! with one seek, while bulk mutation lands through an atomic commit.
//!
//! ## Architecture
//!
//! - **Format**: a single little-endian file with a sorted `(key, offset)`
//!   directory table and one `caplen + values` record per key
//! - **Directory**: the in-memory key -> offset index, optionally keyed on
//!   truncated keys (`key >> shift`) to trade seeks for RAM
//! - **Reader**: seek-based lookups behind a fixed-capacity LRU value cache
//! - **MmapReader**: a zero-copy alternative over the same file
//! - **SetAlgebra**: merge-based union / intersection / difference on the
//!   sorted sets
//! - **Mutator**: per-key edit handles staged into a dirty set, committed
//!   in place when reserved capacity allows or by atomic full rewrite
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use eightsetmap::{SetMap, SetRead};
//!
//! # fn main() -> Result<(), eightsetmap::Error> {
//! let mut map = SetMap::open("data.8sm")?;
//!
//! // stage and commit some values
//! {
//!     let mut mm = map.mutate(false);
//!     let key = mm.open_key(42);
//!     key.put(7);
//!     key.put(11);
//!     key.sync();
//!     mm.commit(false)?;
//! }
//!
//! // read them back, sorted
//! if let Some(values) = map.get(42) {
//!     println!("42 -> {:?}", values);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cache;
pub mod config;
pub mod directory;
pub mod error;
pub mod format;
pub mod mmap;
pub mod reader;
pub mod sets;
pub mod writer;

pub use cache::CacheStats;
pub use config::{Options, DEFAULT_CACHE_SIZE, DEFAULT_CAPACITY, FILL_FACTOR};
pub use error::{Error, Result};
pub use mmap::MmapSetMap;
pub use reader::{SetMap, SetRead};
pub use sets::{
    difference, intersect, merge_difference, merge_intersect, merge_union, multi_intersect,
    multi_union, union,
};
pub use writer::{default_packer, tight_packer, ExtraFn, MutableKey, MutableMap, PackerFn};
