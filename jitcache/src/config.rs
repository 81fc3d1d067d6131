//! Configuration of table sizes and cache behaviour.

use crate::block::ModeBits;

/// Configuration for [`BlockCache`][crate::BlockCache].
///
/// All sizes are given as shifts so that every table can be indexed with a mask.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
    /// The fast dispatch table has `1 << fast_map_bits` slots
    pub fast_map_bits: u32,
    /// Validity granules are `1 << granule_shift` bytes
    pub granule_shift: u32,
    /// Range index buckets cover `1 << range_shift` bytes
    pub range_shift: u32,
    /// Bytes of physical address space tracked by the validity bitset.
    ///
    /// Granules above this limit are always reported as possibly
    /// containing code.
    pub valid_block_space: u32,
    /// Mode bits that take part in block identity
    pub mode_mask: ModeBits,
    /// Maximum number of resolve attempts in a single dispatch
    pub max_dispatch_attempts: u32,
    /// Prefix of the names handed to the symbol registrar
    pub symbol_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            fast_map_bits: 16,
            granule_shift: 5,
            range_shift: 12,
            valid_block_space: 0x2000_0000,
            mode_mask: ModeBits::INSTRUCTION_TRANSLATION | ModeBits::DATA_TRANSLATION,
            max_dispatch_attempts: 8,
            symbol_prefix: String::from("JIT_PPC_"),
        }
    }
}

impl CacheConfig {
    /// Size of one validity granule in bytes
    #[must_use]
    pub fn granule_size(&self) -> u32 {
        1 << self.granule_shift
    }

    /// Size of one range index bucket in bytes
    #[must_use]
    pub fn range_size(&self) -> u32 {
        1 << self.range_shift
    }

    /// Number of fast dispatch table slots
    #[must_use]
    pub fn fast_map_len(&self) -> usize {
        1 << self.fast_map_bits
    }

    /// Clamp out-of-range values so that every derived size is representable.
    pub(crate) fn sanitized(mut self) -> Self {
        self.fast_map_bits = self.fast_map_bits.clamp(1, 24);
        self.granule_shift = self.granule_shift.clamp(2, 16);
        // A bucket must hold at least one whole granule
        self.range_shift = self.range_shift.clamp(self.granule_shift, 31);
        self.max_dispatch_attempts = self.max_dispatch_attempts.max(1);
        self
    }
}
