//! Bitset recording which physical granules may contain compiled guest code.

/// One bit per physical granule.
///
/// A set bit means that some live block may depend on the granule. A
/// clear bit guarantees that none does, which lets invalidation of small
/// writes return immediately.
///
/// The bitset is exposed read-only through
/// [`BlockCache::validity_bitmap`][crate::BlockCache::validity_bitmap] so
/// that memory write paths can pre-check writes without calling into the
/// cache.
pub struct ValidBlockBitSet {
    words: Box<[u32]>,
    granule_shift: u32,
}

impl ValidBlockBitSet {
    /// Create a bitset covering `space` bytes of physical memory.
    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn new(space: u32, granule_shift: u32) -> Self {
        let granules = (u64::from(space) >> granule_shift) as usize;
        let word_count = granules.div_ceil(u32::BITS as usize);
        Self {
            words: vec![0u32; word_count].into_boxed_slice(),
            granule_shift,
        }
    }

    /// Granule index containing `address`
    #[must_use]
    pub fn granule_of(&self, address: u32) -> u32 {
        address >> self.granule_shift
    }

    /// Number of granules tracked
    #[must_use]
    pub fn granule_count(&self) -> usize {
        self.words.len() * u32::BITS as usize
    }

    fn locate(&self, granule: u32) -> Option<(usize, u32)> {
        let word = (granule / u32::BITS) as usize;
        (word < self.words.len()).then_some((word, granule % u32::BITS))
    }

    /// Test a granule.
    ///
    /// Granules outside the tracked space are always reported as set,
    /// since nothing is known about them.
    #[must_use]
    pub fn test_granule(&self, granule: u32) -> bool {
        match self.locate(granule) {
            Some((word, bit)) => self.words[word] & (1 << bit) != 0,
            None => true,
        }
    }

    /// Test the granule containing `address`
    #[must_use]
    pub fn test(&self, address: u32) -> bool {
        self.test_granule(self.granule_of(address))
    }

    pub(crate) fn set_granule(&mut self, granule: u32) {
        if let Some((word, bit)) = self.locate(granule) {
            self.words[word] |= 1 << bit;
        }
    }

    pub(crate) fn clear_granule(&mut self, granule: u32) {
        if let Some((word, bit)) = self.locate(granule) {
            self.words[word] &= !(1 << bit);
        }
    }

    /// Set every granule touched by the inclusive byte range `[first, last]`
    pub(crate) fn set_range(&mut self, first: u32, last: u32) {
        for granule in self.granule_of(first)..=self.granule_of(last) {
            self.set_granule(granule);
        }
    }

    pub(crate) fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Raw words of the bitset. Bit `g % 32` of word `g / 32` is granule `g`.
    #[must_use]
    pub fn as_words(&self) -> &[u32] {
        &self.words
    }

    /// Number of set granules
    #[must_use]
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }
}
