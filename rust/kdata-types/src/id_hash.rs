//! Hash maps keyed by [`ItemId`](crate::ItemId).
//!
//! ItemIds are either random or digests, so their bits are already well distributed
//! and can be used as the hash directly.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasherDefault, Hasher};

pub type IdHashMap<K, V> = HashMap<K, V, BuildHasherDefault<IdHasher>>;

pub type IdHashSet<K> = HashSet<K, BuildHasherDefault<IdHasher>>;

/// Folds a 128-bit key into its hash value without mixing.
///
/// Only 128-bit and 64-bit integer writes are supported; anything else panics.
#[derive(Default)]
pub struct IdHasher(u64);

impl Hasher for IdHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }

    #[inline]
    fn write(&mut self, _: &[u8]) {
        unimplemented!("IdHasher only supports u64 and u128 keys");
    }

    #[inline]
    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        self.0 = (i as u64) ^ ((i >> 64) as u64).rotate_left(17);
    }
}
