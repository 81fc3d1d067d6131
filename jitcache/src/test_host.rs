//! Scripted [`HandleJit`] implementation shared by the unit tests.

use std::ops::Range;

use hashbrown::{HashMap, HashSet};
use thiserror::Error;

use crate::{
    BlockCache, BlockId, CodeAddr, CompiledCode, ExitLink, HandleJit, ModeBits,
    block::Block, error::BlockError,
};

/// Guest code the host pretends to find at an address
#[derive(Debug, Clone)]
pub struct Program {
    pub size: u32,
    pub exits: Vec<u32>,
    pub link: bool,
}

impl Program {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            exits: Vec::new(),
            link: true,
        }
    }

    pub fn with_exits(mut self, exits: &[u32]) -> Self {
        self.exits = exits.to_vec();
        self
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new(1)
    }
}

#[derive(Debug, Error)]
pub enum TestHostError {
    #[error("Cannot compile {0:#010x}")]
    CompileFailed(u32),
    #[error("Symbol map unavailable")]
    SymbolMap,
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// Host translating addresses like a GameCube in its default BAT setup.
///
/// With instruction translation on, `0x8000_0000..` mirrors physical memory
/// from zero. Without it, addresses are physical.
#[derive(Default)]
pub struct TestHost {
    pub mode: ModeBits,
    pub programs: HashMap<u32, Program>,
    /// Pages (4 KiB) that do not translate
    pub unmapped: HashSet<u32>,
    pub fail_compile: bool,
    /// Return `Ok` from compile without finalizing anything
    pub skip_finalize: bool,
    pub fail_symbols: bool,

    pub compiles: Vec<(u32, ModeBits)>,
    /// Current target of every exit stub ever written
    pub patches: HashMap<CodeAddr, Option<CodeAddr>>,
    pub link_writes: Vec<(CodeAddr, Option<CodeAddr>)>,
    pub destroyed: Vec<u32>,
    pub symbols: Vec<String>,
    pub purged: Vec<Range<u32>>,
    pub hint_clears: usize,
    next_code: usize,
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            next_code: 0x1_0000,
            ..Self::default()
        }
    }

    pub fn add_program(&mut self, address: u32, program: Program) {
        self.programs.insert(address, program);
    }

    fn emit(&mut self, program: &Program) -> CompiledCode {
        let base = self.next_code;
        self.next_code += 0x100;
        CompiledCode {
            original_size: program.size,
            code_size: 0x100,
            checked_entry: CodeAddr(base),
            normal_entry: CodeAddr(base + 0x10),
            exits: program
                .exits
                .iter()
                .enumerate()
                .map(|(n, target)| ExitLink::new(*target, CodeAddr(base + 0x20 + 8 * n)))
                .collect(),
        }
    }

    /// Current patch of the exit stub at `site`
    pub fn patch_at(&self, site: CodeAddr) -> Option<CodeAddr> {
        self.patches.get(&site).copied().flatten()
    }
}

impl HandleJit for TestHost {
    type Error = TestHostError;

    fn translate_address(&self, address: u32, mode: ModeBits) -> Option<u32> {
        if self.unmapped.contains(&(address & !0xfff)) {
            return None;
        }
        if mode.contains(ModeBits::INSTRUCTION_TRANSLATION) && address >= 0x8000_0000 {
            Some(address - 0x8000_0000)
        } else {
            Some(address)
        }
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
        self.compiles.push((address, mode));
        if self.fail_compile {
            return Err(TestHostError::CompileFailed(address));
        }
        let id = cache
            .allocate(&*self, address, mode)
            .ok_or(TestHostError::CompileFailed(address))?;
        if self.skip_finalize {
            cache.discard(id)?;
            return Ok(());
        }
        let program = self.programs.get(&address).cloned().unwrap_or_default();
        let code = self.emit(&program);
        cache.finalize(self, id, program.link, code)?;
        Ok(())
    }

    fn write_link(&mut self, exit: &ExitLink, target: Option<CodeAddr>) {
        self.patches.insert(exit.site(), target);
        self.link_writes.push((exit.site(), target));
    }

    fn on_block_destroyed(&mut self, block: &Block) {
        self.destroyed.push(block.effective_address());
    }

    fn register_symbol(
        &mut self,
        _code: CodeAddr,
        _size: usize,
        name: &str,
    ) -> Result<(), Self::Error> {
        if self.fail_symbols {
            return Err(TestHostError::SymbolMap);
        }
        self.symbols.push(name.to_owned());
        Ok(())
    }

    fn purge_hints(&mut self, range: Range<u32>) {
        self.purged.push(range);
    }

    fn clear_hints(&mut self) {
        self.hint_clears += 1;
    }
}

/// Dispatch `address` and return the block that answered
pub fn compile_at(
    cache: &mut BlockCache,
    host: &mut TestHost,
    address: u32,
    mode: ModeBits,
) -> BlockId {
    cache
        .dispatch(host, address, mode)
        .expect("dispatch succeeds");
    cache
        .lookup(&*host, address, mode)
        .expect("dispatched block is live")
}

/// Small tables, so that tests can exercise aliasing
pub fn small_cache() -> BlockCache {
    BlockCache::new(crate::CacheConfig {
        fast_map_bits: 8,
        valid_block_space: 0x10_0000,
        ..crate::CacheConfig::default()
    })
}
