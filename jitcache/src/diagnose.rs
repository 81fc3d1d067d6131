use crate::BlockCache;

/// Diagnostic information for [`BlockCache`].
///
/// This struct can be retrieved from [`BlockCache::diagnose`]
#[derive(Debug, Clone)]
pub struct DiagnosticInformation {
    /// Number of finalized blocks
    pub live_blocks: usize,
    /// Number of allocated but not yet finalized blocks
    pub pending_blocks: usize,
    /// Number of occupied fast map slots
    pub fast_map_occupancy: usize,
    /// Number of range index buckets, including empty ones
    pub range_buckets: usize,
    /// Number of leaked empty range index buckets
    pub empty_range_buckets: usize,
    /// Number of `(target, source)` pairs in the link graph
    pub link_graph_entries: usize,
    /// Number of exits currently patched to a block
    pub linked_exits: usize,
    /// Number of set validity granules
    pub valid_granules: usize,
    /// Count of dispatches answered from the fast map
    #[cfg(feature = "more_diagnose")]
    pub fast_hit_count: usize,
    /// Count of dispatches that went through the slow path
    #[cfg(feature = "more_diagnose")]
    pub slow_path_count: usize,
    /// Count of compile requests to the host
    #[cfg(feature = "more_diagnose")]
    pub compile_count: usize,
    /// Count of invalidation requests
    #[cfg(feature = "more_diagnose")]
    pub invalidation_count: usize,
    /// Count of invalidations rejected by the validity bitset
    #[cfg(feature = "more_diagnose")]
    pub fast_reject_count: usize,
    /// Count of destroyed blocks
    #[cfg(feature = "more_diagnose")]
    pub destroyed_count: usize,
    /// Count of exits patched to a block
    #[cfg(feature = "more_diagnose")]
    pub link_write_count: usize,
    /// Count of exits patched back to the dispatcher
    #[cfg(feature = "more_diagnose")]
    pub unlink_write_count: usize,
    /// Count of full clears
    #[cfg(feature = "more_diagnose")]
    pub clear_count: usize,
    /// Ratio of dispatches answered from the fast map
    #[cfg(feature = "more_diagnose")]
    pub fast_hit_ratio: f64,
}

#[cfg(feature = "more_diagnose")]
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub fast_hit_count: usize,
    pub slow_path_count: usize,
    pub compile_count: usize,
    pub invalidation_count: usize,
    pub fast_reject_count: usize,
    pub destroyed_count: usize,
    pub link_write_count: usize,
    pub unlink_write_count: usize,
    pub clear_count: usize,
}

impl BlockCache {
    /// Get diagnostic information
    #[must_use]
    pub fn diagnose(&self) -> DiagnosticInformation {
        let (live_blocks, linked_exits) = self
            .blocks()
            .fold((0, 0), |(blocks, exits), (_, block)| {
                let linked = block.exits().iter().filter(|exit| exit.is_linked()).count();
                (blocks + 1, exits + linked)
            });
        #[cfg(feature = "more_diagnose")]
        let fast_hit_ratio = {
            let total = self
                .counters
                .fast_hit_count
                .saturating_add(self.counters.slow_path_count);
            self.counters.fast_hit_count as f64 / total as f64
        };

        DiagnosticInformation {
            live_blocks,
            pending_blocks: self.store.len() - live_blocks,
            fast_map_occupancy: self.fast_map.occupancy(),
            range_buckets: self.range_map.len(),
            empty_range_buckets: self.range_map.empty_buckets(),
            link_graph_entries: self.link_graph.len(),
            linked_exits,
            valid_granules: self.valid_blocks.count_set(),
            #[cfg(feature = "more_diagnose")]
            fast_hit_count: self.counters.fast_hit_count,
            #[cfg(feature = "more_diagnose")]
            slow_path_count: self.counters.slow_path_count,
            #[cfg(feature = "more_diagnose")]
            compile_count: self.counters.compile_count,
            #[cfg(feature = "more_diagnose")]
            invalidation_count: self.counters.invalidation_count,
            #[cfg(feature = "more_diagnose")]
            fast_reject_count: self.counters.fast_reject_count,
            #[cfg(feature = "more_diagnose")]
            destroyed_count: self.counters.destroyed_count,
            #[cfg(feature = "more_diagnose")]
            link_write_count: self.counters.link_write_count,
            #[cfg(feature = "more_diagnose")]
            unlink_write_count: self.counters.unlink_write_count,
            #[cfg(feature = "more_diagnose")]
            clear_count: self.counters.clear_count,
            #[cfg(feature = "more_diagnose")]
            fast_hit_ratio,
        }
    }
}
