//! Bit-per-sector occupancy map.
//!
//! One bit per 512-byte sector of the source device. Bits are only ever set
//! within a tracking session, never cleared, which keeps snapshot semantics
//! trivial: a `clone()` is an independent, internally consistent copy.

/// Fixed-capacity bitset mapping sectors of a device.
#[derive(Debug, Clone)]
pub struct SectorMap {
    words: Vec<u64>,
    nsectors: usize,
}

impl SectorMap {
    /// Creates an all-unset map covering `nsectors` sectors.
    pub fn new(nsectors: usize) -> Self {
        Self {
            words: vec![0u64; nsectors.div_ceil(64)],
            nsectors,
        }
    }

    /// Marks `sector` as used. Out-of-range access is a programming error.
    pub fn set(&mut self, sector: usize) {
        assert!(
            sector < self.nsectors,
            "sector {sector} out of range for map of {} sectors",
            self.nsectors
        );
        self.words[sector / 64] |= 1u64 << (sector % 64);
    }

    /// Returns whether `sector` has been marked.
    pub fn test(&self, sector: usize) -> bool {
        assert!(
            sector < self.nsectors,
            "sector {sector} out of range for map of {} sectors",
            self.nsectors
        );
        self.words[sector / 64] & (1u64 << (sector % 64)) != 0
    }

    /// Number of sectors the map covers.
    pub fn sectors(&self) -> usize {
        self.nsectors
    }

    /// Number of marked sectors.
    pub fn count_set(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Lazy sequence of marked sector indices, in ascending order.
    pub fn set_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nsectors).filter(move |&s| self.test(s))
    }

    /// Lazy sequence of unmarked sector indices, in ascending order.
    pub fn unset_sectors(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.nsectors).filter(move |&s| !self.test(s))
    }
}
