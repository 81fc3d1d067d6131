//! Direct-mapped table from guest program counter to block, used on the hot path.

use crate::block::BlockId;

/// Fixed-size direct-mapped dispatch table.
///
/// Aliasing addresses simply overwrite each other. Entries are never trusted
/// on their own: every hit is tag-checked against the block it names (see
/// [`BlockCache::dispatch`][crate::BlockCache::dispatch]), so evicted or stale
/// entries need no notification.
pub struct FastBlockMap {
    table: Box<[Option<BlockId>]>,
    mask: usize,
}

impl FastBlockMap {
    /// Create a table with `1 << bits` empty slots
    #[must_use]
    pub fn new(bits: u32) -> Self {
        let len = 1usize << bits;
        Self {
            table: vec![None; len].into_boxed_slice(),
            mask: len - 1,
        }
    }

    /// Slot for a guest effective address.
    ///
    /// The two low bits are discarded since instructions are 4-byte aligned.
    #[must_use]
    pub fn index_for(&self, address: u32) -> usize {
        (address >> 2) as usize & self.mask
    }

    /// Current occupant of `index`, not validated
    #[must_use]
    pub fn get(&self, index: usize) -> Option<BlockId> {
        self.table.get(index).copied().flatten()
    }

    /// Install `id` at the slot of `address`, returning that slot
    pub(crate) fn install(&mut self, address: u32, id: BlockId) -> usize {
        let index = self.index_for(address);
        self.table[index] = Some(id);
        index
    }

    /// Empty `index` if it still holds `id`.
    pub(crate) fn evict(&mut self, index: usize, id: BlockId) {
        if let Some(entry) = self.table.get_mut(index)
            && *entry == Some(id)
        {
            *entry = None;
        }
    }

    pub(crate) fn clear(&mut self) {
        self.table.fill(None);
    }

    /// Number of occupied slots
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.table.iter().filter(|entry| entry.is_some()).count()
    }

    /// Raw view of the table
    #[must_use]
    pub fn as_slice(&self) -> &[Option<BlockId>] {
        &self.table
    }
}
