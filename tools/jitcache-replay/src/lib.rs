pub mod simulated_host;
pub mod trace;

use jitcache::{BlockCache, DiagnosticInformation, EventQueue, HandleJit, error::CacheError};
use thiserror::Error;

use crate::{
    simulated_host::SimulatedHost,
    trace::{Address, TraceEvent},
};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to dispatch {pc:#010x} at event {index}")]
    Dispatch {
        index: usize,
        pc: u32,
        #[source]
        source: CacheError<SimulatedHost>,
    },
}

/// Apply every event of a trace to `cache`.
///
/// Clears requested through [`TraceEvent::RequestClear`] are sent from a
/// separate thread and applied before the next dispatch, the way an
/// emulator drains its event queue between blocks.
pub fn replay(
    events: &[TraceEvent],
    cache: &mut BlockCache,
    host: &mut SimulatedHost,
    queue: &EventQueue,
) -> Result<(), ReplayError> {
    for (index, event) in events.iter().enumerate() {
        match event {
            TraceEvent::SetMode(mode) => host.set_mode(*mode),
            TraceEvent::Dispatch { pc: Address(pc) } => {
                queue.run_pending(cache, host);
                host.statistics_mut().dispatches += 1;
                let mode = host.current_mode();
                let entry = cache
                    .dispatch(host, *pc, mode)
                    .map_err(|source| ReplayError::Dispatch {
                        index,
                        pc: *pc,
                        source,
                    })?;
                log::trace!("Run {pc:#010x} at {entry}");
            }
            TraceEvent::Write {
                address: Address(address),
                length,
                forced,
            } => cache.invalidate(host, *address, *length, *forced),
            TraceEvent::Load(program) => {
                let range = host.load(program.clone());
                cache.invalidate_physical(host, range.start, range.end - range.start, false);
            }
            TraceEvent::Clear => cache.clear(host),
            TraceEvent::RequestClear => {
                let sender = queue.sender();
                std::thread::scope(|scope| {
                    scope.spawn(|| BlockCache::request_clear(&sender));
                });
            }
            TraceEvent::Compact => {
                let dropped = cache.compact_range_map();
                log::debug!("Dropped {dropped} empty range buckets");
            }
        }
    }
    queue.run_pending(cache, host);

    Ok(())
}

pub fn report_diagnose(diagnostic_information: &DiagnosticInformation) {
    let DiagnosticInformation {
        live_blocks,
        pending_blocks,
        fast_map_occupancy,
        range_buckets,
        empty_range_buckets,
        link_graph_entries,
        linked_exits,
        valid_granules,
        ..
    } = diagnostic_information;
    log::info!(
        "Block cache diagnose statistics
Blocks
\t{live_blocks} live
\t{pending_blocks} pending
Indexes
\t{fast_map_occupancy} fast map slots
\t{range_buckets} range buckets ({empty_range_buckets} empty)
\t{link_graph_entries} link graph entries
\t{linked_exits} linked exits
\t{valid_granules} valid granules
    "
    );
    #[cfg(feature = "diagnose")]
    {
        let DiagnosticInformation {
            fast_hit_count,
            slow_path_count,
            compile_count,
            invalidation_count,
            fast_reject_count,
            destroyed_count,
            link_write_count,
            unlink_write_count,
            clear_count,
            fast_hit_ratio,
            ..
        } = diagnostic_information;
        log::info!(
            "Block cache counters
Dispatch
\t{fast_hit_count} fast hits
\t{slow_path_count} slow paths
\t{compile_count} compiles
\t{fast_hit_ratio:.3} hit ratio
Invalidation
\t{invalidation_count} requests
\t{fast_reject_count} fast rejects
\t{destroyed_count} destroyed blocks
Linking
\t{link_write_count} links
\t{unlink_write_count} unlinks
\t{clear_count} clears
    "
        );
    }
}
