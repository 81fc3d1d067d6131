//! Compiled block structures and the small value types shared by every index.

use derive_more::Display;

/// Size in bytes of one guest instruction.
///
/// Guest instructions are fixed-width and 4-byte aligned.
pub const INSTRUCTION_SIZE: u32 = 4;

/// Guest execution-mode flags that affect translation.
///
/// Two blocks at the same effective address compiled under different mode
/// bits are different blocks. The cache always masks incoming mode bits with
/// [`CacheConfig::mode_mask`][crate::CacheConfig::mode_mask] before using them.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[display("{_0:#x}")]
pub struct ModeBits(pub u32);

impl ModeBits {
    /// No mode bits set (real mode)
    pub const NONE: Self = Self(0);
    /// Instruction address translation enabled (MSR.IR)
    pub const INSTRUCTION_TRANSLATION: Self = Self(1 << 5);
    /// Data address translation enabled (MSR.DR)
    pub const DATA_TRANSLATION: Self = Self(1 << 4);

    /// Raw bits
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all bits in `other` are set in `self`
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Keep only the bits set in `mask`
    #[must_use]
    pub const fn masked(self, mask: Self) -> Self {
        Self(self.0 & mask.0)
    }
}

impl std::ops::BitOr for ModeBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Opaque address of host native code.
///
/// The cache never dereferences these. They are handed back to the
/// [`HandleJit`][crate::HandleJit] implementor when patching, and to
/// the dispatcher as entry points.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[display("{_0:#x}")]
pub struct CodeAddr(pub usize);

/// Handle of a block inside the [`BlockCache`][crate::BlockCache].
///
/// Handles carry a generation. Once the block is destroyed, the handle
/// becomes stale and every lookup through it fails, even if the slot
/// is later reused by another block.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("#{index}@{generation}")]
pub struct BlockId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// A control-flow exit of a block that may be patched into a direct jump.
#[derive(Debug, Clone)]
pub struct ExitLink {
    /// Guest effective address this exit jumps to
    target: u32,
    /// Native location of the exit stub, meaningful only to the patcher
    site: CodeAddr,
    /// Block this exit currently jumps to directly
    linked_to: Option<BlockId>,
}

impl ExitLink {
    /// Create an unresolved exit to guest address `target`, whose stub lives at `site`
    #[must_use]
    pub fn new(target: u32, site: CodeAddr) -> Self {
        Self {
            target,
            site,
            linked_to: None,
        }
    }

    /// Guest effective address this exit jumps to
    #[must_use]
    pub fn target(&self) -> u32 {
        self.target
    }

    /// Native location of the exit stub
    #[must_use]
    pub fn site(&self) -> CodeAddr {
        self.site
    }

    /// Whether this exit has been patched into a direct jump
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.linked_to.is_some()
    }

    /// The block this exit is patched to jump into, if any
    #[must_use]
    pub fn linked_to(&self) -> Option<BlockId> {
        self.linked_to
    }

    pub(crate) fn set_linked_to(&mut self, block: Option<BlockId>) {
        self.linked_to = block;
    }
}

/// Result of code generation, handed to [`BlockCache::finalize`][crate::BlockCache::finalize].
#[derive(Debug, Clone)]
pub struct CompiledCode {
    /// Number of guest instructions covered by the block
    pub original_size: u32,
    /// Size of the emitted native code in bytes
    pub code_size: usize,
    /// Entry that re-validates address and mode before running the block
    pub checked_entry: CodeAddr,
    /// Entry used by the dispatcher and by direct links
    pub normal_entry: CodeAddr,
    /// Exits that are candidates for direct linking
    pub exits: Vec<ExitLink>,
}

/// A compiled translation unit.
#[derive(Debug, Clone)]
pub struct Block {
    pub(crate) effective_address: u32,
    pub(crate) physical_address: u32,
    pub(crate) mode: ModeBits,
    pub(crate) original_size: u32,
    pub(crate) code_size: usize,
    pub(crate) checked_entry: CodeAddr,
    pub(crate) normal_entry: CodeAddr,
    pub(crate) exits: Vec<ExitLink>,
    /// Slot last written for this block in the fast map. May be stale.
    pub(crate) fast_map_index: Option<usize>,
    pub(crate) finalized: bool,
    /// Whether the exits of this block are registered in the link graph
    pub(crate) link_enabled: bool,
}

impl Block {
    pub(crate) fn pending(effective_address: u32, physical_address: u32, mode: ModeBits) -> Self {
        Self {
            effective_address,
            physical_address,
            mode,
            original_size: 0,
            code_size: 0,
            checked_entry: CodeAddr::default(),
            normal_entry: CodeAddr::default(),
            exits: Vec::new(),
            fast_map_index: None,
            finalized: false,
            link_enabled: false,
        }
    }

    /// Guest program counter at block entry
    #[must_use]
    pub fn effective_address(&self) -> u32 {
        self.effective_address
    }

    /// Physical address of the first guest instruction
    #[must_use]
    pub fn physical_address(&self) -> u32 {
        self.physical_address
    }

    /// Mode bits the block was compiled under
    #[must_use]
    pub fn mode(&self) -> ModeBits {
        self.mode
    }

    /// Number of guest instructions covered
    #[must_use]
    pub fn original_size(&self) -> u32 {
        self.original_size
    }

    /// Size of the native code in bytes
    #[must_use]
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    #[must_use]
    pub fn checked_entry(&self) -> CodeAddr {
        self.checked_entry
    }

    #[must_use]
    pub fn normal_entry(&self) -> CodeAddr {
        self.normal_entry
    }

    #[must_use]
    pub fn exits(&self) -> &[ExitLink] {
        &self.exits
    }

    /// Slot this block was last installed at in the fast map
    #[must_use]
    pub fn fast_map_index(&self) -> Option<usize> {
        self.fast_map_index
    }

    /// Whether [`BlockCache::finalize`][crate::BlockCache::finalize] has run for this block
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Last guest byte covered by this block (inclusive).
    ///
    /// Only meaningful for finalized blocks, which always cover
    /// at least one instruction.
    #[must_use]
    pub fn physical_last_byte(&self) -> u32 {
        self.physical_address.saturating_add(
            self.original_size
                .saturating_mul(INSTRUCTION_SIZE)
                .saturating_sub(1),
        )
    }

    /// Whether the guest bytes of this block intersect `[address, address + length)`.
    #[must_use]
    pub fn overlaps(&self, address: u32, length: u32) -> bool {
        if length == 0 {
            return false;
        }
        let block_start = u64::from(self.physical_address);
        let block_end = u64::from(self.physical_last_byte()) + 1;
        let range_start = u64::from(address);
        let range_end = range_start + u64::from(length);

        range_start < block_end && block_start < range_end
    }

    /// Whether this block answers a lookup for `effective_address` under `mode`.
    pub(crate) fn matches(&self, effective_address: u32, mode: ModeBits) -> bool {
        self.finalized && self.effective_address == effective_address && self.mode == mode
    }
}
