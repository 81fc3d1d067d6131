//! Reverse index from exit targets to the blocks whose exits jump there.

use hashbrown::HashMap;

use crate::block::{Block, BlockId};

const LINK_GRAPH_INITIAL_CAPACITY: usize = 0x1000;

/// Guest effective address to every link-enabled block with an exit there.
///
/// When a block is finalized at address `A`, the blocks listed under `A` are
/// the only ones that may have an exit waiting to be patched to it. When a
/// block at `A` is destroyed, they are the only ones whose exits may have to
/// be unpatched.
pub struct LinkGraph {
    sources: HashMap<u32, Vec<BlockId>>,
}

impl LinkGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sources: HashMap::with_capacity(LINK_GRAPH_INITIAL_CAPACITY),
        }
    }

    /// Register every exit of `block`.
    ///
    /// A block with several exits to the same target is registered once.
    pub(crate) fn register(&mut self, id: BlockId, block: &Block) {
        for exit in block.exits() {
            let sources = self.sources.entry(exit.target()).or_default();
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
    }

    /// Remove every registration made by [`register`][Self::register]
    pub(crate) fn unregister(&mut self, id: BlockId, block: &Block) {
        for exit in block.exits() {
            if let Some(sources) = self.sources.get_mut(&exit.target()) {
                sources.retain(|source| *source != id);
                if sources.is_empty() {
                    self.sources.remove(&exit.target());
                }
            }
        }
    }

    /// Blocks with at least one exit to `target`
    #[must_use]
    pub fn sources(&self, target: u32) -> &[BlockId] {
        self.sources.get(&target).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn clear(&mut self) {
        self.sources.clear();
    }

    /// Number of `(target, source)` pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[BlockId])> {
        self.sources
            .iter()
            .map(|(target, sources)| (*target, sources.as_slice()))
    }
}

impl Default for LinkGraph {
    fn default() -> Self {
        Self::new()
    }
}
