use perfect_derive::perfect_derive;
use thiserror::Error;

use crate::{
    HandleJit,
    block::{BlockId, ModeBits},
};

/// Errors of [`BlockCache::finalize`][crate::BlockCache::finalize].
///
/// This error does not depend on the host, so compilers can easily
/// wrap it into their own error type.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    /// The handle refers to a block that has been discarded or destroyed
    #[error("Block {0} is no longer live")]
    StaleBlock(BlockId),
    /// The block has already been finalized
    #[error("Block {0} is already finalized")]
    AlreadyFinalized(BlockId),
    /// The compiled code covers no guest instruction
    #[error("Block {0} covers no guest instruction")]
    EmptyBlock(BlockId),
}

#[derive(Error)]
#[perfect_derive(Debug)]
pub enum CacheError<H: HandleJit> {
    /// Host error
    #[error("Host error")]
    Host(#[source] H::Error),
    /// Dispatch gave up after repeated misses on the same address
    #[error("No block for {address:#010x} under mode {mode} after {attempts} attempts")]
    Unresolved {
        address: u32,
        mode: ModeBits,
        attempts: u32,
    },
}

pub(crate) type CacheResult<T, H> = core::result::Result<T, CacheError<H>>;

/// An internal consistency violation reported by
/// [`BlockCache::check_invariants`][crate::BlockCache::check_invariants].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Blocks {first} and {second} share address {effective_address:#010x}/{physical_address:#010x} under mode {mode}")]
    DuplicateBlock {
        first: BlockId,
        second: BlockId,
        effective_address: u32,
        physical_address: u32,
        mode: ModeBits,
    },
    #[error("Fast map slot {slot} names block {block} which is not installed there")]
    FastMapMismatch { slot: usize, block: BlockId },
    #[error("Granule {granule:#x} of block {block} is not marked valid")]
    MissingValidity { block: BlockId, granule: u32 },
    #[error("Granule {granule:#x} is marked valid but no live block covers it")]
    StaleValidity { granule: u32 },
    #[error("Block {block} is not registered in range bucket {key:#010x}")]
    MissingRangeEntry { block: BlockId, key: u32 },
    #[error("Range bucket {key:#010x} names {block} which does not overlap it")]
    StrayRangeEntry { block: BlockId, key: u32 },
    #[error("Range bucket {key:#010x} names dead or pending block {block}")]
    DeadRangeEntry { block: BlockId, key: u32 },
    #[error("Link graph names dead block {block} under {target:#010x}")]
    DeadLinkSource { block: BlockId, target: u32 },
    #[error("Link graph names block {block} under {target:#010x} but it has no linkable exit there")]
    StrayLinkSource { block: BlockId, target: u32 },
    #[error("Exit to {target:#010x} of block {block} is not registered in the link graph")]
    MissingLinkSource { block: BlockId, target: u32 },
    #[error("Exit of block {block} is linked to dead block {linked_to}")]
    DanglingLink { block: BlockId, linked_to: BlockId },
    #[error("Exit of block {block} to {target:#010x} is linked to {linked_to} which has a different entry")]
    MislinkedExit {
        block: BlockId,
        target: u32,
        linked_to: BlockId,
    },
}
