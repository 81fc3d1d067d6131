use std::ops::Range;

use hashbrown::HashMap;
use jitcache::{
    Block, BlockCache, CodeAddr, CompiledCode, ExitLink, HandleJit, ModeBits,
    error::BlockError,
};
use serde::Serialize;
use thiserror::Error;

use crate::trace::GuestProgram;

const PROGRAMS_INITIAL_CAPACITY: usize = 0x100;
/// Native bytes emitted per guest instruction
const CODE_PER_INSTRUCTION: usize = 0x10;

#[derive(Debug, Error)]
pub enum SimulatedHostError {
    #[error("No guest code at {physical_address:#010x} (effective {effective_address:#010x})")]
    NoCode {
        effective_address: u32,
        physical_address: u32,
    },
    #[error("Address {0:#010x} is not mapped")]
    Unmapped(u32),
    #[error("Failed to finalize block")]
    Block(#[from] BlockError),
}

/// Counters of host-side effects
#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayStatistics {
    pub dispatches: usize,
    pub compiles: usize,
    pub link_writes: usize,
    pub unlink_writes: usize,
    pub destroyed_blocks: usize,
    pub hint_purges: usize,
    pub clears: usize,
}

/// Emulator stand-in with a flat code arena.
///
/// Translation follows the default GameCube BAT setup: with instruction
/// translation on, `0x8000_0000..0x8180_0000` mirrors physical memory, and
/// everything else is unmapped. In real mode addresses are physical.
pub struct SimulatedHost {
    mode: ModeBits,
    /// Physical address to guest code
    programs: HashMap<u32, GuestProgram>,
    next_code: usize,
    statistics: ReplayStatistics,
}

const MEM1_SIZE: u32 = 0x0180_0000;
const CACHED_MIRROR: u32 = 0x8000_0000;

impl SimulatedHost {
    #[must_use]
    pub fn new(programs: &[GuestProgram]) -> Self {
        let mut host = Self {
            mode: ModeBits::NONE,
            programs: HashMap::with_capacity(PROGRAMS_INITIAL_CAPACITY),
            next_code: 0x1000_0000,
            statistics: ReplayStatistics::default(),
        };
        for program in programs {
            host.load(program.clone());
        }
        host
    }

    pub fn set_mode(&mut self, mode: ModeBits) {
        self.mode = mode;
    }

    /// Place guest code in physical memory, returning the bytes it covers
    pub fn load(&mut self, program: GuestProgram) -> Range<u32> {
        let start = program.address.0;
        let end = start.saturating_add(program.size.saturating_mul(jitcache::INSTRUCTION_SIZE));
        self.programs.insert(start, program);
        start..end
    }

    #[must_use]
    pub fn statistics(&self) -> &ReplayStatistics {
        &self.statistics
    }

    pub(crate) fn statistics_mut(&mut self) -> &mut ReplayStatistics {
        &mut self.statistics
    }

    fn emit(&mut self, program: &GuestProgram) -> CompiledCode {
        let base = self.next_code;
        let code_size = (program.size as usize + program.exits.len()) * CODE_PER_INSTRUCTION;
        self.next_code += code_size.next_multiple_of(0x100);
        let exits_base = base + program.size as usize * CODE_PER_INSTRUCTION;
        CompiledCode {
            original_size: program.size,
            code_size,
            checked_entry: CodeAddr(base),
            normal_entry: CodeAddr(base + CODE_PER_INSTRUCTION),
            exits: program
                .exits
                .iter()
                .enumerate()
                .map(|(n, target)| {
                    ExitLink::new(target.0, CodeAddr(exits_base + n * CODE_PER_INSTRUCTION))
                })
                .collect(),
        }
    }
}

impl HandleJit for SimulatedHost {
    type Error = SimulatedHostError;

    fn translate_address(&self, address: u32, mode: ModeBits) -> Option<u32> {
        if !mode.contains(ModeBits::INSTRUCTION_TRANSLATION) {
            return Some(address);
        }
        let physical_address = address.checked_sub(CACHED_MIRROR)?;
        (physical_address < MEM1_SIZE).then_some(physical_address)
    }

    fn current_mode(&self) -> ModeBits {
        self.mode
    }

    fn compile(
        &mut self,
        cache: &mut BlockCache,
        address: u32,
        mode: ModeBits,
    ) -> Result<(), Self::Error> {
        self.statistics.compiles += 1;
        let physical_address = self
            .translate_address(address, mode)
            .ok_or(SimulatedHostError::Unmapped(address))?;
        let program = self
            .programs
            .get(&physical_address)
            .cloned()
            .ok_or(SimulatedHostError::NoCode {
                effective_address: address,
                physical_address,
            })?;
        let id = cache
            .allocate(&*self, address, mode)
            .ok_or(SimulatedHostError::Unmapped(address))?;
        let code = self.emit(&program);
        cache.finalize(self, id, program.link, code)?;
        Ok(())
    }

    fn write_link(&mut self, exit: &ExitLink, target: Option<CodeAddr>) {
        match target {
            Some(target) => {
                self.statistics.link_writes += 1;
                log::trace!("Patch {} -> {target}", exit.site());
            }
            None => {
                self.statistics.unlink_writes += 1;
                log::trace!("Patch {} -> dispatcher", exit.site());
            }
        }
    }

    fn on_block_destroyed(&mut self, block: &Block) {
        self.statistics.destroyed_blocks += 1;
        log::trace!(
            "Free {} bytes of native code at {}",
            block.code_size(),
            block.checked_entry()
        );
    }

    fn register_symbol(
        &mut self,
        code: CodeAddr,
        size: usize,
        name: &str,
    ) -> Result<(), Self::Error> {
        log::trace!("Symbol {name} at {code} ({size} bytes)");
        Ok(())
    }

    fn purge_hints(&mut self, range: Range<u32>) {
        self.statistics.hint_purges += 1;
        log::trace!("Purge hints in {:#010x}..{:#010x}", range.start, range.end);
    }

    fn clear_hints(&mut self) {
        self.statistics.clears += 1;
    }
}
