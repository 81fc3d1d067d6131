//! Block cache for dynamic binary translators.
//!
//! A [`BlockCache`] owns every compiled block of a guest and answers four
//! questions for the emulator around it:
//!
//! * Where is the native code for the guest program counter I am about to
//!   run? ([`BlockCache::dispatch`])
//! * Which exits of already compiled blocks can be patched into direct jumps?
//!   (done automatically while finalizing, through [`HandleJit::write_link`])
//! * Which blocks must die because guest memory was written?
//!   ([`BlockCache::invalidate`])
//! * How do I drop everything? ([`BlockCache::clear`], or
//!   [`BlockCache::request_clear`] from another thread)
//!
//! The cache does not generate, execute or patch native code itself. Those
//! services are provided by the emulator through the [`HandleJit`] trait.

mod block;
mod block_store;
mod config;
mod diagnose;
pub mod error;
mod event;
mod fast_map;
mod host;
mod link_graph;
mod range_map;
#[cfg(test)]
mod test_host;
mod valid_block;

use std::ops::Range;

#[cfg(feature = "more_diagnose")]
use crate::diagnose::Counters;
use crate::{
    block_store::BlockStore,
    error::{BlockError, CacheError, CacheResult, InvariantViolation},
};
pub use crate::{
    block::{Block, BlockId, CodeAddr, CompiledCode, ExitLink, INSTRUCTION_SIZE, ModeBits},
    config::CacheConfig,
    diagnose::DiagnosticInformation,
    event::{CacheEvent, EventQueue, EventSender, ScheduleEvent},
    fast_map::FastBlockMap,
    host::HandleJit,
    link_graph::LinkGraph,
    range_map::BlockRangeMap,
    valid_block::ValidBlockBitSet,
};

/// Cache of compiled guest blocks.
///
/// All mutation happens on the guest-execution thread through `&mut self`.
/// Every operation that needs emulator services takes the host as an
/// argument instead of storing it.
pub struct BlockCache {
    config: CacheConfig,
    store: BlockStore,
    fast_map: FastBlockMap,
    valid_blocks: ValidBlockBitSet,
    range_map: BlockRangeMap,
    link_graph: LinkGraph,
    #[cfg(feature = "more_diagnose")]
    counters: Counters,
}

impl BlockCache {
    /// Create an empty cache.
    ///
    /// Out-of-range configuration values are clamped.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let config = config.sanitized();
        Self {
            store: BlockStore::new(),
            fast_map: FastBlockMap::new(config.fast_map_bits),
            valid_blocks: ValidBlockBitSet::new(config.valid_block_space, config.granule_shift),
            range_map: BlockRangeMap::new(config.range_shift),
            link_graph: LinkGraph::new(),
            #[cfg(feature = "more_diagnose")]
            counters: Counters::default(),
            config,
        }
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Create a pending block for the guest code at `effective_address`.
    ///
    /// Returns `None` if the address does not translate under `mode`. The block
    /// stays invisible to lookups until it is [finalized][Self::finalize].
    pub fn allocate<H: HandleJit>(
        &mut self,
        host: &H,
        effective_address: u32,
        mode: ModeBits,
    ) -> Option<BlockId> {
        let mode = mode.masked(self.config.mode_mask);
        let physical_address = host.translate_address(effective_address, mode)?;
        Some(
            self.store
                .insert(Block::pending(effective_address, physical_address, mode)),
        )
    }

    /// Abandon a pending block, for example when code generation failed.
    pub fn discard(&mut self, id: BlockId) -> Result<(), BlockError> {
        let block = self.store.get(id).ok_or(BlockError::StaleBlock(id))?;
        if block.finalized {
            return Err(BlockError::AlreadyFinalized(id));
        }
        self.store.remove(id);
        Ok(())
    }

    /// Publish a pending block.
    ///
    /// The block is installed in the fast map and the invalidation indexes.
    /// If `link` is set, its exits are registered for direct linking, and
    /// every exit that can be patched, in this block or in blocks jumping
    /// to it, is patched now. A live block with the same address and mode
    /// is destroyed first.
    pub fn finalize<H: HandleJit>(
        &mut self,
        host: &mut H,
        id: BlockId,
        link: bool,
        code: CompiledCode,
    ) -> Result<(), BlockError> {
        let block = self.store.get(id).ok_or(BlockError::StaleBlock(id))?;
        if block.finalized {
            return Err(BlockError::AlreadyFinalized(id));
        }
        if code.original_size == 0 {
            return Err(BlockError::EmptyBlock(id));
        }
        let effective_address = block.effective_address;
        let physical_address = block.physical_address;
        let mode = block.mode;

        let duplicates = self
            .store
            .at_physical(physical_address)
            .iter()
            .copied()
            .filter(|other| {
                *other != id
                    && self
                        .store
                        .get(*other)
                        .is_some_and(|block| block.matches(effective_address, mode))
            })
            .collect::<Vec<_>>();
        if !duplicates.is_empty() {
            self.evict_blocks(host, &duplicates);
        }

        let CompiledCode {
            original_size,
            code_size,
            checked_entry,
            normal_entry,
            mut exits,
        } = code;
        for exit in &mut exits {
            exit.set_linked_to(None);
        }

        let block = self.store.get_mut(id).ok_or(BlockError::StaleBlock(id))?;
        block.original_size = original_size;
        block.code_size = code_size;
        block.checked_entry = checked_entry;
        block.normal_entry = normal_entry;
        block.exits = exits;
        block.finalized = true;
        block.link_enabled = link;
        block.fast_map_index = Some(self.fast_map.install(effective_address, id));

        let block: &Block = block;
        self.valid_blocks
            .set_range(physical_address, block.physical_last_byte());
        self.range_map.insert(id, block);
        if link {
            self.link_graph.register(id, block);
        }
        log::trace!(
            "Finalized block {id} at {effective_address:#010x}/{physical_address:#010x} mode {mode}, {original_size} instructions"
        );

        if link {
            self.on_block_finalized(host, id);
        }

        let name = format!("{}{physical_address:08x}", self.config.symbol_prefix);
        if let Err(err) = host.register_symbol(checked_entry, code_size, &name) {
            log::debug!("Failed to register symbol {name}: {err}");
        }

        Ok(())
    }

    /// Get the entry of the block for `pc` under `mode`, compiling it if needed.
    ///
    /// The fast map is tried first. On a miss the block is looked up, or
    /// compiled through [`HandleJit::compile`], then moved into the fast map,
    /// and the fast map is tried again. This is repeated at most
    /// [`CacheConfig::max_dispatch_attempts`] times.
    pub fn dispatch<H: HandleJit>(
        &mut self,
        host: &mut H,
        pc: u32,
        mode: ModeBits,
    ) -> CacheResult<CodeAddr, H> {
        let mode = mode.masked(self.config.mode_mask);
        let slot = self.fast_map.index_for(pc);
        let mut attempts = 0;
        loop {
            if let Some(id) = self.fast_map.get(slot)
                && let Some(block) = self.store.get(id)
                && block.matches(pc, mode)
            {
                #[cfg(feature = "more_diagnose")]
                if attempts == 0 {
                    self.counters.fast_hit_count += 1;
                }
                return Ok(block.normal_entry);
            }
            if attempts == self.config.max_dispatch_attempts {
                log::warn!("Giving up dispatch of {pc:#010x} under mode {mode} after {attempts} attempts");
                return Err(CacheError::Unresolved {
                    address: pc,
                    mode,
                    attempts,
                });
            }
            attempts += 1;
            #[cfg(feature = "more_diagnose")]
            {
                self.counters.slow_path_count += 1;
            }
            self.move_block_into_fast_cache(host, pc, mode)?;
        }
    }

    /// Install the block for `pc` under `mode` in the fast map, compiling it if
    /// no such block exists.
    ///
    /// An existing block leaves its previous slot, and linking is re-run for it.
    pub fn move_block_into_fast_cache<H: HandleJit>(
        &mut self,
        host: &mut H,
        pc: u32,
        mode: ModeBits,
    ) -> CacheResult<(), H> {
        let Some(id) = self.lookup(&*host, pc, mode) else {
            #[cfg(feature = "more_diagnose")]
            {
                self.counters.compile_count += 1;
            }
            return host
                .compile(self, pc, mode.masked(self.config.mode_mask))
                .map_err(CacheError::Host);
        };

        if let Some(block) = self.store.get_mut(id) {
            if let Some(old_slot) = block.fast_map_index {
                self.fast_map.evict(old_slot, id);
            }
            block.fast_map_index = Some(self.fast_map.install(pc, id));
        }
        self.on_block_finalized(host, id);

        Ok(())
    }

    /// Find the finalized block for `effective_address` under `mode`
    pub fn lookup<H: HandleJit>(
        &self,
        host: &H,
        effective_address: u32,
        mode: ModeBits,
    ) -> Option<BlockId> {
        let mode = mode.masked(self.config.mode_mask);
        let physical_address = host.translate_address(effective_address, mode)?;
        self.find_block(effective_address, physical_address, mode)
    }

    fn find_block(&self, effective_address: u32, physical_address: u32, mode: ModeBits) -> Option<BlockId> {
        self.store
            .at_physical(physical_address)
            .iter()
            .copied()
            .find(|id| {
                self.store
                    .get(*id)
                    .is_some_and(|block| block.matches(effective_address, mode))
            })
    }

    /// Patch every unresolved exit of `id` whose target block exists
    fn link_exits<H: HandleJit>(&mut self, host: &mut H, id: BlockId) {
        let Some(block) = self.store.get(id) else {
            return;
        };
        if !block.link_enabled {
            return;
        }
        let mode = block.mode;
        let resolved = block
            .exits
            .iter()
            .enumerate()
            .filter(|(_, exit)| !exit.is_linked())
            .filter_map(|(n, exit)| {
                let target = self.lookup(&*host, exit.target(), mode)?;
                let entry = self.store.get(target)?.normal_entry;
                Some((n, target, entry))
            })
            .collect::<Vec<_>>();

        for (n, target, entry) in resolved {
            let Some(exit) = self
                .store
                .get_mut(id)
                .and_then(|block| block.exits.get_mut(n))
            else {
                continue;
            };
            exit.set_linked_to(Some(target));
            host.write_link(exit, Some(entry));
            log::trace!("Linked exit {n} of block {id} to block {target} at {entry}");
            #[cfg(feature = "more_diagnose")]
            {
                self.counters.link_write_count += 1;
            }
        }
    }

    /// Link the exits of `id`, then the exits of every block waiting to jump to it
    fn on_block_finalized<H: HandleJit>(&mut self, host: &mut H, id: BlockId) {
        let Some(block) = self.store.get(id) else {
            return;
        };
        let effective_address = block.effective_address;
        let mode = block.mode;

        self.link_exits(host, id);

        let sources = self
            .link_graph
            .sources(effective_address)
            .iter()
            .copied()
            .filter(|source| {
                *source != id
                    && self
                        .store
                        .get(*source)
                        .is_some_and(|block| block.finalized && block.mode == mode)
            })
            .collect::<Vec<_>>();
        for source in sources {
            self.link_exits(host, source);
        }
    }

    /// Unpatch every exit linked to `id`
    fn unlink<H: HandleJit>(&mut self, host: &mut H, id: BlockId) {
        let Some(block) = self.store.get(id) else {
            return;
        };
        let sources = self.link_graph.sources(block.effective_address).to_vec();
        for source in sources {
            let Some(source_block) = self.store.get_mut(source) else {
                continue;
            };
            for exit in &mut source_block.exits {
                if exit.linked_to() == Some(id) {
                    exit.set_linked_to(None);
                    host.write_link(exit, None);
                    log::trace!("Unlinked exit of block {source} from block {id}");
                    #[cfg(feature = "more_diagnose")]
                    {
                        self.counters.unlink_write_count += 1;
                    }
                }
            }
        }
    }

    /// Release a block from every index except the range map
    fn destroy_block<H: HandleJit>(&mut self, host: &mut H, id: BlockId) {
        let Some(block) = self.store.get(id) else {
            return;
        };
        if let Some(slot) = block.fast_map_index {
            self.fast_map.evict(slot, id);
        }
        if block.finalized {
            self.unlink(host, id);
            let Some(block) = self.store.get(id) else {
                return;
            };
            if block.link_enabled {
                self.link_graph.unregister(id, block);
            }
            host.on_block_destroyed(block);
        }
        let Some(block) = self.store.remove(id) else {
            return;
        };
        log::trace!(
            "Destroyed block {id} at {:#010x}/{:#010x}",
            block.effective_address,
            block.physical_address
        );
        #[cfg(feature = "more_diagnose")]
        {
            self.counters.destroyed_count += 1;
        }
    }

    /// Destroy finalized blocks that are not being found through a range scan
    fn evict_blocks<H: HandleJit>(&mut self, host: &mut H, ids: &[BlockId]) {
        let mut spans = Vec::with_capacity(ids.len());
        for &id in ids {
            let Some(block) = self.store.get(id) else {
                continue;
            };
            spans.push((block.physical_address, block.physical_last_byte()));
            self.range_map.remove(id, block);
            self.destroy_block(host, id);
        }
        self.repair_validity(&spans);
    }

    /// Invalidate guest memory at `[effective_address, effective_address + length)`.
    ///
    /// The address is translated under [`HandleJit::current_mode`]; untranslatable
    /// addresses are ignored. Every block overlapping the range is destroyed.
    /// Unless `forced`, the host is asked to purge its per-address hints for
    /// the range whenever blocks may have been affected.
    pub fn invalidate<H: HandleJit>(
        &mut self,
        host: &mut H,
        effective_address: u32,
        length: u32,
        forced: bool,
    ) {
        let mode = host.current_mode().masked(self.config.mode_mask);
        let Some(physical_address) = host.translate_address(effective_address, mode) else {
            return;
        };
        if self.destroy_range(host, physical_address, length) && !forced {
            host.purge_hints(hint_range(effective_address, length));
        }
    }

    /// Same as [`invalidate`][Self::invalidate], for an already translated address.
    ///
    /// The range handed to [`HandleJit::purge_hints`] is the physical range.
    /// Hosts whose hint caches are keyed by effective address should use
    /// [`invalidate`][Self::invalidate], or purge the effective range themselves.
    pub fn invalidate_physical<H: HandleJit>(
        &mut self,
        host: &mut H,
        physical_address: u32,
        length: u32,
        forced: bool,
    ) {
        if self.destroy_range(host, physical_address, length) && !forced {
            host.purge_hints(hint_range(physical_address, length));
        }
    }

    /// Destroy every block overlapping `[physical_address, physical_address + length)`.
    ///
    /// Returns `false` if the range was rejected without consulting the range map.
    fn destroy_range<H: HandleJit>(&mut self, host: &mut H, physical_address: u32, length: u32) -> bool {
        if length == 0 {
            return false;
        }
        #[cfg(feature = "more_diagnose")]
        {
            self.counters.invalidation_count += 1;
        }
        let end = (u64::from(physical_address) + u64::from(length)).min(1 << 32);
        #[expect(clippy::cast_possible_truncation)]
        let last_byte = (end - 1) as u32;
        let mut spans = Vec::new();

        // Cache-line sized writes are the common case, and can be answered by
        // the bitset alone.
        if length == self.config.granule_size() {
            let first_granule = self.valid_blocks.granule_of(physical_address);
            let last_granule = self.valid_blocks.granule_of(last_byte);
            if (first_granule..=last_granule).all(|granule| !self.valid_blocks.test_granule(granule)) {
                #[cfg(feature = "more_diagnose")]
                {
                    self.counters.fast_reject_count += 1;
                }
                return false;
            }
            for granule in first_granule..=last_granule {
                self.valid_blocks.clear_granule(granule);
            }
            spans.push((physical_address, last_byte));
        }

        let start_key = self.range_map.key_of(physical_address);
        for key in self.range_map.keys_in(start_key, end) {
            let Some(bucket) = self.range_map.bucket(key) else {
                continue;
            };
            let overlapping = bucket
                .iter()
                .copied()
                .filter(|id| {
                    self.store
                        .get(*id)
                        .is_some_and(|block| block.overlaps(physical_address, length))
                })
                .collect::<Vec<_>>();

            for id in overlapping {
                if let Some(block) = self.store.get(id) {
                    spans.push((block.physical_address, block.physical_last_byte()));
                    self.range_map.remove_except(id, block, Some(key));
                }
                if let Some(bucket) = self.range_map.bucket_mut(key) {
                    bucket.remove(&id);
                }
                self.destroy_block(host, id);
            }
            self.range_map.drop_if_empty(key);
        }

        self.repair_validity(&spans);
        true
    }

    /// Recompute the validity bits of every granule touched by `spans`.
    ///
    /// Each span is an inclusive byte range. The bits are cleared, then set
    /// again for the surviving blocks registered in the covering buckets.
    fn repair_validity(&mut self, spans: &[(u32, u32)]) {
        for &(first, last) in spans {
            let first_granule = self.valid_blocks.granule_of(first);
            let last_granule = self.valid_blocks.granule_of(last);
            for granule in first_granule..=last_granule {
                self.valid_blocks.clear_granule(granule);
            }
        }
        for &(first, last) in spans {
            for key in self.range_map.keys_covering(first, last) {
                let Some(bucket) = self.range_map.bucket(key) else {
                    continue;
                };
                for id in bucket {
                    if let Some(block) = self.store.get(*id) {
                        self.valid_blocks
                            .set_range(block.physical_address, block.physical_last_byte());
                    }
                }
            }
        }
    }

    /// Drop the range map buckets that no longer hold any block.
    ///
    /// Returns the number of dropped buckets.
    pub fn compact_range_map(&mut self) -> usize {
        self.range_map.remove_empty()
    }

    /// Destroy every block, including pending ones, and empty every index.
    ///
    /// Exits are unpatched and [`HandleJit::on_block_destroyed`] is called for
    /// every finalized block. Calling this twice in a row is the same as
    /// calling it once.
    pub fn clear<H: HandleJit>(&mut self, host: &mut H) {
        let count = self.store.len();
        for id in self.store.ids() {
            self.destroy_block(host, id);
        }
        self.store.clear();
        self.fast_map.clear();
        self.valid_blocks.clear_all();
        self.range_map.clear();
        self.link_graph.clear();
        host.clear_hints();
        log::debug!("Cleared block cache, {count} blocks destroyed");
        #[cfg(feature = "more_diagnose")]
        {
            self.counters.clear_count += 1;
        }
    }

    /// Clear the cache, re-create every table from the configuration and
    /// zero the statistics.
    pub fn reset<H: HandleJit>(&mut self, host: &mut H) {
        self.clear(host);
        self.fast_map = FastBlockMap::new(self.config.fast_map_bits);
        self.valid_blocks =
            ValidBlockBitSet::new(self.config.valid_block_space, self.config.granule_shift);
        self.range_map = BlockRangeMap::new(self.config.range_shift);
        self.link_graph = LinkGraph::new();
        #[cfg(feature = "more_diagnose")]
        {
            self.counters = Counters::default();
        }
        log::debug!("Reset block cache");
    }

    /// [Reset][Self::reset] with a new configuration
    pub fn reconfigure<H: HandleJit>(&mut self, host: &mut H, config: CacheConfig) {
        self.config = config.sanitized();
        self.reset(host);
    }

    /// Ask the guest-execution thread to clear the cache.
    ///
    /// Callable from any thread. The clear runs when the owner of the queue
    /// hands the event to [`handle_event`][Self::handle_event].
    pub fn request_clear<S: ScheduleEvent + ?Sized>(queue: &S) {
        queue.schedule_zero_delay(CacheEvent::ClearCache);
    }

    /// Apply a scheduled event
    pub fn handle_event<H: HandleJit>(&mut self, host: &mut H, event: CacheEvent) {
        match event {
            CacheEvent::ClearCache => self.clear(host),
        }
    }

    /// Call `f` on every finalized block
    pub fn for_each_live_block(&self, mut f: impl FnMut(BlockId, &Block)) {
        for (id, block) in self.blocks() {
            f(id, block);
        }
    }

    /// Iterate over every finalized block
    pub fn blocks(&self) -> impl Iterator<Item = (BlockId, &Block)> {
        self.store.iter().filter(|(_, block)| block.finalized)
    }

    /// Get a block, pending or finalized
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.store.get(id)
    }

    #[must_use]
    pub fn validity_bitmap(&self) -> &ValidBlockBitSet {
        &self.valid_blocks
    }

    #[must_use]
    pub fn fast_block_map(&self) -> &FastBlockMap {
        &self.fast_map
    }

    #[must_use]
    pub fn range_map(&self) -> &BlockRangeMap {
        &self.range_map
    }

    #[must_use]
    pub fn link_graph(&self) -> &LinkGraph {
        &self.link_graph
    }

    /// Check the consistency of every index against the block store.
    ///
    /// This walks the whole cache and is meant for tests and fuzzing.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for (id, block) in self.blocks() {
            self.check_block(id, block)?;
        }

        for (slot, entry) in self.fast_map.as_slice().iter().enumerate() {
            let Some(id) = *entry else {
                continue;
            };
            if let Some(block) = self.store.get(id)
                && (!block.finalized || self.fast_map.index_for(block.effective_address) != slot)
            {
                return Err(InvariantViolation::FastMapMismatch { slot, block: id });
            }
        }

        for (key, bucket) in self.range_map.iter() {
            for &id in bucket {
                let Some(block) = self.store.get(id).filter(|block| block.finalized) else {
                    return Err(InvariantViolation::DeadRangeEntry { block: id, key });
                };
                if !block.overlaps(key, self.config.range_size()) {
                    return Err(InvariantViolation::StrayRangeEntry { block: id, key });
                }
            }
        }

        let mut expected =
            ValidBlockBitSet::new(self.config.valid_block_space, self.config.granule_shift);
        for (_, block) in self.blocks() {
            expected.set_range(block.physical_address, block.physical_last_byte());
        }
        for (n, (actual, expected)) in self
            .valid_blocks
            .as_words()
            .iter()
            .zip(expected.as_words())
            .enumerate()
        {
            let stale = actual & !expected;
            if stale != 0 {
                #[expect(clippy::cast_possible_truncation)]
                let granule = n as u32 * u32::BITS + stale.trailing_zeros();
                return Err(InvariantViolation::StaleValidity { granule });
            }
        }

        for (target, sources) in self.link_graph.iter() {
            for &id in sources {
                let Some(block) = self.store.get(id) else {
                    return Err(InvariantViolation::DeadLinkSource { block: id, target });
                };
                if !block.finalized
                    || !block.link_enabled
                    || !block.exits.iter().any(|exit| exit.target() == target)
                {
                    return Err(InvariantViolation::StrayLinkSource { block: id, target });
                }
            }
        }

        Ok(())
    }

    fn check_block(&self, id: BlockId, block: &Block) -> Result<(), InvariantViolation> {
        for &other in self.store.at_physical(block.physical_address) {
            if other != id
                && self
                    .store
                    .get(other)
                    .is_some_and(|other| other.matches(block.effective_address, block.mode))
            {
                return Err(InvariantViolation::DuplicateBlock {
                    first: id,
                    second: other,
                    effective_address: block.effective_address,
                    physical_address: block.physical_address,
                    mode: block.mode,
                });
            }
        }

        let first_granule = self.valid_blocks.granule_of(block.physical_address);
        let last_granule = self.valid_blocks.granule_of(block.physical_last_byte());
        if let Some(granule) =
            (first_granule..=last_granule).find(|granule| !self.valid_blocks.test_granule(*granule))
        {
            return Err(InvariantViolation::MissingValidity { block: id, granule });
        }

        for key in self
            .range_map
            .keys_covering(block.physical_address, block.physical_last_byte())
        {
            if !self
                .range_map
                .bucket(key)
                .is_some_and(|bucket| bucket.contains(&id))
            {
                return Err(InvariantViolation::MissingRangeEntry { block: id, key });
            }
        }

        for exit in &block.exits {
            if block.link_enabled && !self.link_graph.sources(exit.target()).contains(&id) {
                return Err(InvariantViolation::MissingLinkSource {
                    block: id,
                    target: exit.target(),
                });
            }
            let Some(linked_to) = exit.linked_to() else {
                continue;
            };
            let Some(target) = self.store.get(linked_to).filter(|target| target.finalized) else {
                return Err(InvariantViolation::DanglingLink {
                    block: id,
                    linked_to,
                });
            };
            if target.effective_address != exit.target() || target.mode != block.mode {
                return Err(InvariantViolation::MislinkedExit {
                    block: id,
                    target: exit.target(),
                    linked_to,
                });
            }
        }

        Ok(())
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

fn hint_range(address: u32, length: u32) -> Range<u32> {
    address..address.saturating_add(length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_host::{Program, TestHost, TestHostError, compile_at, small_cache};

    const IR: ModeBits = ModeBits::INSTRUCTION_TRANSLATION;

    fn code(original_size: u32) -> CompiledCode {
        CompiledCode {
            original_size,
            code_size: 0x40,
            checked_entry: CodeAddr(0x100),
            normal_entry: CodeAddr(0x110),
            exits: Vec::new(),
        }
    }

    #[test]
    fn test_dispatch_compiles_once_on_miss() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let entry = cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap();
        let again = cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap();
        assert_eq!(entry, again);
        assert_eq!(host.compiles, [(0x1000, ModeBits::NONE)]);

        let id = cache.lookup(&host, 0x1000, ModeBits::NONE).unwrap();
        assert_eq!(cache.block(id).map(Block::normal_entry), Some(entry));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_small_block_invalidated_by_cache_line_write() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x8000, Program::new(4));

        let first = compile_at(&mut cache, &mut host, 0x8000, ModeBits::NONE);
        assert!(cache.validity_bitmap().test(0x8000));

        cache.invalidate(&mut host, 0x8000, 32, false);
        assert!(cache.block(first).is_none());
        assert!(!cache.validity_bitmap().test(0x8000));
        assert!(cache.range_map().is_empty());
        assert_eq!(host.destroyed, [0x8000]);
        assert_eq!(host.purged, [0x8000..0x8020]);
        cache.check_invariants().unwrap();

        let second = compile_at(&mut cache, &mut host, 0x8000, ModeBits::NONE);
        assert_ne!(first, second);
        assert_eq!(host.compiles.len(), 2);
    }

    #[test]
    fn test_exit_linked_when_target_compiled_and_unlinked_when_destroyed() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x9000, Program::new(2).with_exits(&[0xa000]));

        let a = compile_at(&mut cache, &mut host, 0x9000, ModeBits::NONE);
        let exit = cache.block(a).unwrap().exits()[0].clone();
        assert!(!exit.is_linked());
        assert_eq!(host.patch_at(exit.site()), None);

        let b = compile_at(&mut cache, &mut host, 0xa000, ModeBits::NONE);
        let b_entry = cache.block(b).unwrap().normal_entry();
        assert_eq!(host.patch_at(exit.site()), Some(b_entry));
        assert_eq!(cache.block(a).unwrap().exits()[0].linked_to(), Some(b));
        cache.check_invariants().unwrap();

        cache.invalidate_physical(&mut host, 0xa000, 4, false);
        assert!(cache.block(b).is_none());
        assert_eq!(host.patch_at(exit.site()), None);
        assert!(!cache.block(a).unwrap().exits()[0].is_linked());
        cache.check_invariants().unwrap();

        // Recompiling the target patches the exit again
        let b = compile_at(&mut cache, &mut host, 0xa000, ModeBits::NONE);
        let b_entry = cache.block(b).unwrap().normal_entry();
        assert_eq!(host.patch_at(exit.site()), Some(b_entry));
    }

    #[test]
    fn test_self_loop_is_linked_and_unlinked() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x3000, Program::new(2).with_exits(&[0x3000]));

        let id = compile_at(&mut cache, &mut host, 0x3000, ModeBits::NONE);
        let block = cache.block(id).unwrap();
        let site = block.exits()[0].site();
        assert_eq!(block.exits()[0].linked_to(), Some(id));
        assert_eq!(host.patch_at(site), Some(block.normal_entry()));

        cache.invalidate_physical(&mut host, 0x3000, 4, false);
        assert_eq!(host.patch_at(site), None);
        assert!(cache.link_graph().is_empty());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_links_require_matching_mode() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x9000, Program::new(1).with_exits(&[0xa000]));

        let a = compile_at(&mut cache, &mut host, 0x9000, ModeBits::NONE);
        compile_at(&mut cache, &mut host, 0xa000, IR);
        assert!(!cache.block(a).unwrap().exits()[0].is_linked());

        let b = compile_at(&mut cache, &mut host, 0xa000, ModeBits::NONE);
        assert_eq!(cache.block(a).unwrap().exits()[0].linked_to(), Some(b));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_mode_and_effective_address_separate_identity() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let real = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        let translated = compile_at(&mut cache, &mut host, 0x1000, IR);
        let mirrored = compile_at(&mut cache, &mut host, 0x8000_1000, IR);
        assert_ne!(real, translated);
        assert_ne!(translated, mirrored);
        assert_eq!(host.compiles.len(), 3);
        assert_eq!(cache.block(mirrored).unwrap().physical_address(), 0x1000);
        assert_eq!(cache.blocks().count(), 3);
        cache.check_invariants().unwrap();

        // Mode bits outside the mask do not take part in identity
        cache
            .dispatch(&mut host, 0x1000, ModeBits::NONE | ModeBits(0x8000))
            .unwrap();
        assert_eq!(host.compiles.len(), 3);

        cache.invalidate_physical(&mut host, 0x1000, 4, false);
        assert_eq!(cache.blocks().count(), 0);
    }

    #[test]
    fn test_finalize_rejects_stale_and_repeated_calls() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let id = cache.allocate(&host, 0x2000, ModeBits::NONE).unwrap();
        assert_eq!(
            cache.finalize(&mut host, id, true, code(0)),
            Err(BlockError::EmptyBlock(id))
        );
        cache.finalize(&mut host, id, true, code(1)).unwrap();
        assert_eq!(
            cache.finalize(&mut host, id, true, code(1)),
            Err(BlockError::AlreadyFinalized(id))
        );
        assert_eq!(cache.discard(id), Err(BlockError::AlreadyFinalized(id)));

        let pending = cache.allocate(&host, 0x3000, ModeBits::NONE).unwrap();
        cache.discard(pending).unwrap();
        assert_eq!(
            cache.finalize(&mut host, pending, true, code(1)),
            Err(BlockError::StaleBlock(pending))
        );
        assert_eq!(cache.discard(pending), Err(BlockError::StaleBlock(pending)));
    }

    #[test]
    fn test_finalizing_duplicate_replaces_older_block() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let first = cache.allocate(&host, 0x2000, ModeBits::NONE).unwrap();
        let second = cache.allocate(&host, 0x2000, ModeBits::NONE).unwrap();
        cache.finalize(&mut host, first, true, code(16)).unwrap();
        cache.finalize(&mut host, second, true, code(1)).unwrap();

        assert!(cache.block(first).is_none());
        assert_eq!(cache.lookup(&host, 0x2000, ModeBits::NONE), Some(second));
        assert_eq!(host.destroyed, [0x2000]);
        // The bytes only the older block covered are no longer marked
        assert!(!cache.validity_bitmap().test(0x2000 + 0x20));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_pending_blocks_are_invisible() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let pending = cache.allocate(&host, 0x3000, ModeBits::NONE).unwrap();
        assert_eq!(cache.lookup(&host, 0x3000, ModeBits::NONE), None);
        assert_eq!(cache.blocks().count(), 0);
        assert!(cache.block(pending).is_some_and(|block| !block.is_finalized()));

        cache.dispatch(&mut host, 0x3000, ModeBits::NONE).unwrap();
        assert_eq!(host.compiles.len(), 1);
        let diagnose = cache.diagnose();
        assert_eq!(diagnose.live_blocks, 1);
        assert_eq!(diagnose.pending_blocks, 1);
        cache.check_invariants().unwrap();

        cache.clear(&mut host);
        assert!(cache.block(pending).is_none());
        assert_eq!(host.destroyed, [0x3000]);
    }

    #[test]
    fn test_allocate_fails_on_untranslatable_address() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.unmapped.insert(0x6000);

        assert_eq!(cache.allocate(&host, 0x6004, ModeBits::NONE), None);
        let err = cache.dispatch(&mut host, 0x6004, ModeBits::NONE).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Host(TestHostError::CompileFailed(0x6004))
        ));

        cache.invalidate(&mut host, 0x6000, 0x100, false);
        assert!(host.purged.is_empty());
    }

    #[test]
    fn test_cache_line_write_without_code_is_rejected_early() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let id = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);

        cache.invalidate_physical(&mut host, 0x2000, 32, false);
        assert!(host.purged.is_empty());

        // Same granule as the block, but no overlap
        cache.invalidate_physical(&mut host, 0x1010, 32, false);
        assert!(cache.block(id).is_some());
        assert_eq!(host.purged, [0x1010..0x1030]);
        assert!(cache.validity_bitmap().test(0x1000));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_unaligned_cache_line_write_reaches_second_granule() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let id = compile_at(&mut cache, &mut host, 0x1020, ModeBits::NONE);
        assert!(!cache.validity_bitmap().test(0x1000));

        cache.invalidate_physical(&mut host, 0x1010, 32, false);
        assert!(cache.block(id).is_none());
        assert_eq!(cache.validity_bitmap().count_set(), 0);
    }

    #[test]
    fn test_validity_repaired_from_surviving_blocks() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        // 0x1000..=0x1007 and 0x1010..=0x102f share the granule at 0x1000
        host.add_program(0x1000, Program::new(2));
        host.add_program(0x1010, Program::new(8));
        let x = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        let y = compile_at(&mut cache, &mut host, 0x1010, ModeBits::NONE);
        assert_eq!(cache.validity_bitmap().count_set(), 2);

        cache.invalidate_physical(&mut host, 0x1000, 4, false);
        assert!(cache.block(x).is_none());
        assert!(cache.block(y).is_some());
        assert!(cache.validity_bitmap().test(0x1000));
        assert!(cache.validity_bitmap().test(0x1020));
        cache.check_invariants().unwrap();

        cache.invalidate_physical(&mut host, 0x1010, 4, false);
        assert!(cache.block(y).is_none());
        assert_eq!(cache.validity_bitmap().count_set(), 0);
    }

    #[test]
    fn test_spanning_block_leaks_empty_bucket_until_compaction() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        // 0x1ff8..=0x2007
        host.add_program(0x1ff8, Program::new(4));
        let id = compile_at(&mut cache, &mut host, 0x1ff8, ModeBits::NONE);
        assert_eq!(cache.range_map().len(), 2);

        cache.invalidate_physical(&mut host, 0x2004, 4, false);
        assert!(cache.block(id).is_none());
        assert_eq!(cache.range_map().len(), 1);
        assert_eq!(cache.diagnose().empty_range_buckets, 1);
        cache.check_invariants().unwrap();

        assert_eq!(cache.compact_range_map(), 1);
        assert!(cache.range_map().is_empty());
    }

    #[test]
    fn test_hint_purge_skipped_when_forced() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        cache.invalidate_physical(&mut host, 0x1000, 8, true);
        assert!(host.purged.is_empty());
        assert_eq!(cache.blocks().count(), 0);

        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        cache.invalidate_physical(&mut host, 0x1000, 0, false);
        assert_eq!(cache.blocks().count(), 1);
        cache.invalidate_physical(&mut host, 0x1000, 8, false);
        assert_eq!(host.purged, [0x1000..0x1008]);
    }

    #[test]
    fn test_invalidate_translates_under_current_mode() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.mode = IR;

        let id = compile_at(&mut cache, &mut host, 0x8000_1000, IR);
        cache.invalidate(&mut host, 0x8000_1000, 4, false);
        assert!(cache.block(id).is_none());
        assert_eq!(host.purged, [0x8000_1000..0x8000_1004]);

        // Already translated writes purge by physical address
        let id = compile_at(&mut cache, &mut host, 0x8000_1000, IR);
        cache.invalidate_physical(&mut host, 0x1000, 4, false);
        assert!(cache.block(id).is_none());
        assert_eq!(host.purged[1], 0x1000..0x1004);
    }

    #[test]
    fn test_stale_handle_after_slot_reuse() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        let old = compile_at(&mut cache, &mut host, 0x4000, ModeBits::NONE);
        cache.invalidate_physical(&mut host, 0x4000, 4, true);
        let new = compile_at(&mut cache, &mut host, 0x4000, ModeBits::NONE);
        assert_eq!(new.index, old.index);
        assert_ne!(new, old);
        assert!(cache.block(old).is_none());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x9000, Program::new(2).with_exits(&[0xa000]));
        compile_at(&mut cache, &mut host, 0x9000, ModeBits::NONE);
        compile_at(&mut cache, &mut host, 0xa000, ModeBits::NONE);

        cache.clear(&mut host);
        assert_eq!(cache.blocks().count(), 0);
        assert_eq!(cache.fast_block_map().occupancy(), 0);
        assert_eq!(cache.validity_bitmap().count_set(), 0);
        assert!(cache.range_map().is_empty());
        assert!(cache.link_graph().is_empty());
        assert_eq!(host.destroyed.len(), 2);
        assert_eq!(host.hint_clears, 1);

        let link_writes = host.link_writes.len();
        cache.clear(&mut host);
        assert_eq!(host.link_writes.len(), link_writes);
        assert_eq!(host.destroyed.len(), 2);
        assert_eq!(host.hint_clears, 2);
        cache.check_invariants().unwrap();

        compile_at(&mut cache, &mut host, 0x9000, ModeBits::NONE);
        assert_eq!(host.compiles.len(), 3);
    }

    #[test]
    fn test_dispatch_gives_up_after_bounded_attempts() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.skip_finalize = true;

        let err = cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Unresolved {
                address: 0x1000,
                attempts: 8,
                ..
            }
        ));
        assert_eq!(host.compiles.len(), 8);
        assert_eq!(cache.diagnose().pending_blocks, 0);
    }

    #[test]
    fn test_compile_error_is_propagated() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.fail_compile = true;

        let err = cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap_err();
        assert!(matches!(
            err,
            CacheError::Host(TestHostError::CompileFailed(0x1000))
        ));
        assert_eq!(host.compiles.len(), 1);
    }

    #[test]
    fn test_symbols_named_after_physical_address() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        compile_at(&mut cache, &mut host, 0x1234, ModeBits::NONE);
        compile_at(&mut cache, &mut host, 0x8000_2000, IR);
        assert_eq!(host.symbols, ["JIT_PPC_00001234", "JIT_PPC_00002000"]);

        host.fail_symbols = true;
        let id = compile_at(&mut cache, &mut host, 0x3000, ModeBits::NONE);
        assert!(cache.block(id).is_some_and(Block::is_finalized));
    }

    #[test]
    fn test_aliasing_dispatch_moves_block_back_without_recompiling() {
        let mut cache = small_cache();
        let mut host = TestHost::new();

        // 256 slots of 4 bytes alias every 0x400 bytes
        let a = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        let b = compile_at(&mut cache, &mut host, 0x1400, ModeBits::NONE);
        let slot = cache.fast_block_map().index_for(0x1000);
        assert_eq!(cache.fast_block_map().get(slot), Some(b));

        cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap();
        assert_eq!(host.compiles.len(), 2);
        assert_eq!(cache.fast_block_map().get(slot), Some(a));
        assert_eq!(cache.block(b).unwrap().fast_map_index(), Some(slot));
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_clear_requested_from_other_thread() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let queue = EventQueue::new();
        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);

        let sender = queue.sender();
        std::thread::spawn(move || BlockCache::request_clear(&sender))
            .join()
            .unwrap();
        assert_eq!(cache.blocks().count(), 1);

        assert_eq!(queue.run_pending(&mut cache, &mut host), 1);
        assert_eq!(cache.blocks().count(), 0);
        assert_eq!(host.hint_clears, 1);
        assert_eq!(queue.run_pending(&mut cache, &mut host), 0);
    }

    #[test]
    fn test_reconfigure_reallocates_tables() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);

        cache.reconfigure(
            &mut host,
            CacheConfig {
                fast_map_bits: 4,
                ..CacheConfig::default()
            },
        );
        assert_eq!(cache.config().fast_map_bits, 4);
        assert_eq!(cache.fast_block_map().as_slice().len(), 16);
        assert_eq!(cache.blocks().count(), 0);

        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_diagnose_reports_index_sizes() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        host.add_program(0x9000, Program::new(2).with_exits(&[0x9010]));
        compile_at(&mut cache, &mut host, 0x9000, ModeBits::NONE);
        compile_at(&mut cache, &mut host, 0x9010, ModeBits::NONE);

        let diagnose = cache.diagnose();
        assert_eq!(diagnose.live_blocks, 2);
        assert_eq!(diagnose.pending_blocks, 0);
        assert_eq!(diagnose.fast_map_occupancy, 2);
        assert_eq!(diagnose.range_buckets, 1);
        assert_eq!(diagnose.link_graph_entries, 1);
        assert_eq!(diagnose.linked_exits, 1);
        assert_eq!(diagnose.valid_granules, 1);
    }

    #[cfg(feature = "more_diagnose")]
    #[test]
    fn test_diagnose_counters() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        cache.dispatch(&mut host, 0x1000, ModeBits::NONE).unwrap();
        cache.invalidate_physical(&mut host, 0x2000, 32, false);
        cache.invalidate_physical(&mut host, 0x1000, 4, false);

        let diagnose = cache.diagnose();
        assert_eq!(diagnose.fast_hit_count, 1);
        assert_eq!(diagnose.slow_path_count, 1);
        assert_eq!(diagnose.compile_count, 1);
        assert_eq!(diagnose.invalidation_count, 2);
        assert_eq!(diagnose.fast_reject_count, 1);
        assert_eq!(diagnose.destroyed_count, 1);
    }

    /// Mixed operations on a small address window, checking every index after each step
    #[test]
    fn test_random_operations_keep_indexes_consistent() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let addresses: Vec<u32> = (0..24).map(|n| 0x1fc0 + n * 0x14).collect();
        for (n, address) in addresses.iter().enumerate() {
            let exits = [
                addresses[(n * 7 + 3) % addresses.len()],
                addresses[(n * 5 + 1) % addresses.len()],
            ];
            #[expect(clippy::cast_possible_truncation)]
            let size = (n % 6) as u32 + 1;
            host.add_program(*address, Program::new(size).with_exits(&exits));
        }

        let mut state = 0x2545_f491_u32;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        };
        for _ in 0..2000 {
            let choice = next();
            let address = addresses[next() as usize % addresses.len()];
            let mode = if next() % 2 == 0 { ModeBits::NONE } else { IR };
            match choice % 16 {
                0..=9 => {
                    cache.dispatch(&mut host, address, mode).unwrap();
                }
                10..=12 => cache.invalidate_physical(&mut host, address + next() % 0x20, 4, false),
                13 | 14 => cache.invalidate_physical(&mut host, address & !0x1f, 32, next() % 2 == 0),
                _ => {
                    if next() % 8 == 0 {
                        cache.clear(&mut host);
                    } else {
                        cache.invalidate_physical(&mut host, address, 0x100, false);
                    }
                }
            }
            cache.check_invariants().unwrap();

            let covered = cache
                .blocks()
                .flat_map(|(_, block)| {
                    let bitmap = cache.validity_bitmap();
                    bitmap.granule_of(block.physical_address())
                        ..=bitmap.granule_of(block.physical_last_byte())
                })
                .collect::<hashbrown::HashSet<_>>();
            assert_eq!(cache.validity_bitmap().count_set(), covered.len());
            for (_, block) in cache.blocks() {
                for exit in block.exits() {
                    let expected = exit
                        .linked_to()
                        .and_then(|target| cache.block(target))
                        .map(Block::normal_entry);
                    assert_eq!(host.patch_at(exit.site()), expected);
                }
            }
        }
    }

    #[test]
    fn test_check_invariants_reports_stale_validity() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        cache.check_invariants().unwrap();

        let granule = cache.valid_blocks.granule_of(0x5000);
        cache.valid_blocks.set_granule(granule);
        assert_eq!(
            cache.check_invariants(),
            Err(InvariantViolation::StaleValidity { granule })
        );
    }

    #[test]
    fn test_check_invariants_reports_stray_link_source() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let id = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);

        let mut other = Block::pending(0x1000, 0x1000, ModeBits::NONE);
        other.exits = vec![ExitLink::new(0x7000, CodeAddr(0x10))];
        cache.link_graph.register(id, &other);
        assert_eq!(
            cache.check_invariants(),
            Err(InvariantViolation::StrayLinkSource {
                block: id,
                target: 0x7000,
            })
        );
    }

    #[test]
    fn test_for_each_live_block_skips_pending_blocks() {
        let mut cache = small_cache();
        let mut host = TestHost::new();
        let first = compile_at(&mut cache, &mut host, 0x1000, ModeBits::NONE);
        let second = compile_at(&mut cache, &mut host, 0x2000, IR);
        let pending = cache.allocate(&host, 0x3000, ModeBits::NONE).unwrap();

        let mut visited = Vec::new();
        cache.for_each_live_block(|id, block| {
            assert!(block.is_finalized());
            visited.push(id);
        });
        visited.sort_by_key(|id| id.index);
        let mut expected = vec![first, second];
        expected.sort_by_key(|id| id.index);
        assert_eq!(visited, expected);
        assert!(!visited.contains(&pending));

        cache.clear(&mut host);
        let mut count = 0;
        cache.for_each_live_block(|_, _| count += 1);
        assert_eq!(count, 0);
    }
}
