use std::{fs::File, io::BufWriter, path::PathBuf, time::Instant};

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::ProgressIterator;
use jitcache::{BlockCache, EventQueue};
use jitcache_replay::{simulated_host::SimulatedHost, trace::Trace};
use serde::Serialize;

/// Replay a JSON trace of guest events against a block cache.
///
/// The trace lists the guest code resident in physical memory and a
/// sequence of dispatches, memory writes, code loads and clears. Every
/// patch the cache asks for is logged.
///
/// Set the environment variable `RUST_LOG=trace` for logging.
#[derive(Parser)]
struct Cmdline {
    /// Path of JSON trace
    #[arg(short, long)]
    input: PathBuf,
    /// Override the number of fast map slots (log2)
    #[arg(long)]
    fast_map_bits: Option<u32>,
    /// Override the size of range map buckets (log2 bytes)
    #[arg(long)]
    range_shift: Option<u32>,
    /// Override the maximum number of attempts of a dispatch
    #[arg(long)]
    max_dispatch_attempts: Option<u32>,
    /// Number of times the trace is replayed.
    ///
    /// The cache is kept across rounds, so that later rounds
    /// mostly hit already compiled blocks.
    #[arg(long, default_value_t = 1)]
    round: usize,
    /// Path for statistics output
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct StatisticsOutput {
    total_time: u128,
    times: Vec<u128>,
    #[serde(flatten)]
    host: jitcache_replay::simulated_host::ReplayStatistics,
}

fn main() -> Result<()> {
    env_logger::init();

    let Cmdline {
        input,
        fast_map_bits,
        range_shift,
        max_dispatch_attempts,
        round,
        output,
    } = Cmdline::parse();

    let file = File::open(input).context("Failed to open input file")?;
    // SAFETY: check the safety requirements of memmap2 documentation
    let buf = unsafe { memmap2::Mmap::map(&file).context("Failed to mmap input file")? };
    let Trace {
        mut config,
        programs,
        events,
    } = serde_json::from_slice(&buf).context("Failed to parse trace")?;

    if let Some(fast_map_bits) = fast_map_bits {
        config.fast_map_bits = fast_map_bits;
    }
    if let Some(range_shift) = range_shift {
        config.range_shift = range_shift;
    }
    if let Some(max_dispatch_attempts) = max_dispatch_attempts {
        config.max_dispatch_attempts = max_dispatch_attempts;
    }

    let mut cache = BlockCache::new(config);
    let mut host = SimulatedHost::new(&programs);
    let queue = EventQueue::new();

    let mut times = Vec::with_capacity(round);
    let instant = Instant::now();
    for _ in (0..round).progress() {
        jitcache_replay::replay(&events, &mut cache, &mut host, &queue)
            .context("Failed to replay trace")?;
        times.push(instant.elapsed().as_nanos());
    }
    let total_time = instant.elapsed().as_nanos();

    cache
        .check_invariants()
        .context("Block cache is inconsistent after replay")?;
    jitcache_replay::report_diagnose(&cache.diagnose());

    if let Some(output) = output {
        let statistics_output = StatisticsOutput {
            total_time,
            times,
            host: host.statistics().clone(),
        };
        serde_json::to_writer(
            BufWriter::new(File::create(output).context("Failed to create output file")?),
            &statistics_output,
        )
        .context("Failed to serialize statistics output into output file")?;
    }

    Ok(())
}
