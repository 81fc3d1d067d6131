//! Owning storage of blocks, addressed by generational handles.

use hashbrown::HashMap;

use crate::block::{Block, BlockId};

struct Slot {
    generation: u32,
    block: Option<Block>,
}

/// Arena owning every block of the cache.
///
/// All other indexes refer to blocks by [`BlockId`]. Removing a block bumps the
/// generation of its slot, so that handles still held by an index are detected
/// as stale instead of silently resolving to whatever block reuses the slot.
pub(crate) struct BlockStore {
    slots: Vec<Slot>,
    /// Indices of empty slots, reused before growing `slots`
    free: Vec<u32>,
    /// Physical address of block entry to all blocks starting there.
    ///
    /// Several blocks may share a physical address when they were compiled from
    /// different effective addresses or under different mode bits.
    by_physical: HashMap<u32, Vec<BlockId>>,
    len: usize,
}

const STORE_INITIAL_CAPACITY: usize = 0x1000;

impl BlockStore {
    pub fn new() -> Self {
        Self {
            slots: Vec::with_capacity(STORE_INITIAL_CAPACITY),
            free: Vec::new(),
            by_physical: HashMap::with_capacity(STORE_INITIAL_CAPACITY),
            len: 0,
        }
    }

    #[expect(clippy::cast_possible_truncation)]
    pub fn insert(&mut self, block: Block) -> BlockId {
        let physical_address = block.physical_address;
        let id = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.block = Some(block);
            BlockId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                block: Some(block),
            });
            BlockId {
                index,
                generation: 0,
            }
        };
        self.by_physical
            .entry(physical_address)
            .or_default()
            .push(id);
        self.len += 1;

        id
    }

    pub fn get(&self, id: BlockId) -> Option<&Block> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_ref()
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.block.as_mut()
    }

    /// Remove a block, invalidating every outstanding handle to it.
    pub fn remove(&mut self, id: BlockId) -> Option<Block> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let block = slot.block.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;

        if let Some(ids) = self.by_physical.get_mut(&block.physical_address) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_physical.remove(&block.physical_address);
            }
        }

        Some(block)
    }

    /// All blocks, pending or finalized, whose entry is at `physical_address`
    pub fn at_physical(&self, physical_address: u32) -> &[BlockId] {
        self.by_physical
            .get(&physical_address)
            .map_or(&[], Vec::as_slice)
    }

    #[expect(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            let id = BlockId {
                index: index as u32,
                generation: slot.generation,
            };
            slot.block.as_ref().map(|block| (id, block))
        })
    }

    pub fn ids(&self) -> Vec<BlockId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    /// Drop every block.
    ///
    /// Generations survive the clear, so handles from before the clear stay stale.
    #[expect(clippy::cast_possible_truncation)]
    pub fn clear(&mut self) {
        self.free.clear();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.block.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
            }
            self.free.push(index as u32);
        }
        // Reuse low slots first
        self.free.reverse();
        self.by_physical.clear();
        self.len = 0;
    }
}
