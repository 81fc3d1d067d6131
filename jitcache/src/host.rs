//! This module contains the definition of [`HandleJit`], the set of services
//! a [`BlockCache`] needs from the emulator around it.

use std::ops::Range;

use crate::{
    BlockCache,
    block::{Block, CodeAddr, ExitLink, ModeBits},
};

/// Services provided by the emulator to a [`BlockCache`].
///
/// The cache never owns its host. Every operation that needs one takes it as
/// an argument, which lets the host call back into the cache while compiling.
///
/// The overall workflow is like:
/// 1. [`BlockCache::dispatch`] misses, and calls [`compile`][HandleJit::compile].
/// 2. The compiler calls [`BlockCache::allocate`], emits code, then calls
///    [`BlockCache::finalize`] with the result.
/// 3. While finalizing and linking, the cache calls
///    [`write_link`][HandleJit::write_link] for every exit it can patch, and
///    [`register_symbol`][HandleJit::register_symbol] once for the block.
/// 4. When guest memory is written, the cache destroys overlapping blocks,
///    calling [`write_link`][HandleJit::write_link] with `None` to unpatch
///    their callers and [`on_block_destroyed`][HandleJit::on_block_destroyed]
///    for each of them.
pub trait HandleJit {
    /// Error of the host, returned by the compiler and the symbol registrar
    type Error: std::error::Error;

    /// Translate a guest effective address under `mode` to a physical address.
    ///
    /// Returns `None` if the address is unmapped.
    fn translate_address(&self, address: u32, mode: ModeBits) -> Option<u32>;

    /// Mode bits the guest is currently running under.
    ///
    /// Used to translate addresses given to [`BlockCache::invalidate`].
    fn current_mode(&self) -> ModeBits;

    /// Compile the block starting at `address` under `mode`.
    ///
    /// Implementors are expected to call [`BlockCache::allocate`] and
    /// [`BlockCache::finalize`]. Returning `Ok` without finalizing a block is
    /// allowed; dispatch will retry a bounded number of times.
    fn compile(
        &mut self,
        cache: &mut BlockCache,
        address: u32,
        mode: ModeBits,
    ) -> Result<(), Self::Error>;

    /// Patch `exit` to jump directly to `target`, or back to the dispatcher if `None`.
    fn write_link(&mut self, exit: &ExitLink, target: Option<CodeAddr>);

    /// Called right before `block` is released
    fn on_block_destroyed(&mut self, _block: &Block) {}

    /// Register native code with an external symbol map, such as a profiler
    fn register_symbol(
        &mut self,
        _code: CodeAddr,
        _size: usize,
        _name: &str,
    ) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Forget per-address compiler hints inside `range`
    fn purge_hints(&mut self, _range: Range<u32>) {}

    /// Forget all per-address compiler hints
    fn clear_hints(&mut self) {}
}
