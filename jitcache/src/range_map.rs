//! Index from aligned macro-ranges of physical memory to the blocks overlapping them.

use std::collections::BTreeMap;

use hashbrown::HashSet;

use crate::block::{Block, BlockId};

/// Coarse-grained invalidation index.
///
/// Physical memory is cut into aligned buckets of `1 << range_shift` bytes. A
/// block is registered in every bucket its guest bytes touch, so a write only
/// has to inspect the blocks of the buckets it touches.
///
/// Buckets emptied by removal from a *different* bucket scan are left in place.
/// They hold no blocks and are either reused or dropped later by
/// [`remove_empty`][Self::remove_empty].
pub struct BlockRangeMap {
    buckets: BTreeMap<u32, HashSet<BlockId>>,
    range_shift: u32,
}

impl BlockRangeMap {
    #[must_use]
    pub fn new(range_shift: u32) -> Self {
        Self {
            buckets: BTreeMap::new(),
            range_shift,
        }
    }

    fn mask(&self) -> u32 {
        !((1u32 << self.range_shift) - 1)
    }

    /// Key of the bucket containing `address`
    #[must_use]
    pub fn key_of(&self, address: u32) -> u32 {
        address & self.mask()
    }

    /// Keys of every bucket touched by the inclusive byte range `[first, last]`
    pub fn keys_covering(&self, first: u32, last: u32) -> impl Iterator<Item = u32> + use<> {
        let step = 1u64 << self.range_shift;
        let first_key = u64::from(self.key_of(first));
        let last_key = u64::from(self.key_of(last));
        (0..=(last_key - first_key) / step).map(move |n| {
            #[expect(clippy::cast_possible_truncation)]
            let key = (first_key + n * step) as u32;
            key
        })
    }

    /// Register `block` in every bucket its bytes touch
    pub(crate) fn insert(&mut self, id: BlockId, block: &Block) {
        for key in self.keys_covering(block.physical_address(), block.physical_last_byte()) {
            self.buckets.entry(key).or_default().insert(id);
        }
    }

    /// Remove `block` from every bucket its bytes touch except `skip_key`.
    ///
    /// Buckets emptied this way are kept.
    pub(crate) fn remove_except(&mut self, id: BlockId, block: &Block, skip_key: Option<u32>) {
        for key in self.keys_covering(block.physical_address(), block.physical_last_byte()) {
            if Some(key) == skip_key {
                continue;
            }
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(&id);
            }
        }
    }

    /// Remove `block` from every bucket its bytes touch, dropping emptied buckets
    pub(crate) fn remove(&mut self, id: BlockId, block: &Block) {
        for key in self.keys_covering(block.physical_address(), block.physical_last_byte()) {
            if let Some(bucket) = self.buckets.get_mut(&key) {
                bucket.remove(&id);
                if bucket.is_empty() {
                    self.buckets.remove(&key);
                }
            }
        }
    }

    /// Keys of existing buckets in `[start_key, end)`.
    ///
    /// `end` is exclusive and given in bytes, so it may be any address.
    pub(crate) fn keys_in(&self, start_key: u32, end: u64) -> Vec<u32> {
        self.buckets
            .range(start_key..)
            .map(|(key, _)| *key)
            .take_while(|key| u64::from(*key) < end)
            .collect()
    }

    /// Blocks registered in bucket `key`
    pub fn bucket(&self, key: u32) -> Option<&HashSet<BlockId>> {
        self.buckets.get(&key)
    }

    pub(crate) fn bucket_mut(&mut self, key: u32) -> Option<&mut HashSet<BlockId>> {
        self.buckets.get_mut(&key)
    }

    /// Drop bucket `key` if it holds no blocks
    pub(crate) fn drop_if_empty(&mut self, key: u32) {
        if self.buckets.get(&key).is_some_and(HashSet::is_empty) {
            self.buckets.remove(&key);
        }
    }

    /// Drop every empty bucket, returning how many were dropped
    pub(crate) fn remove_empty(&mut self) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_empty());
        before - self.buckets.len()
    }

    pub(crate) fn clear(&mut self) {
        self.buckets.clear();
    }

    /// All buckets in key order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &HashSet<BlockId>)> {
        self.buckets.iter().map(|(key, bucket)| (*key, bucket))
    }

    /// Number of buckets, including empty ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of buckets that hold no blocks
    #[must_use]
    pub fn empty_buckets(&self) -> usize {
        self.buckets.values().filter(|bucket| bucket.is_empty()).count()
    }
}
