//! Sector-use tracking decorator around a block source.
//!
//! The tracker is installed in front of the device before any filesystem
//! traversal begins. Every read that passes through it marks the touched
//! sectors in a [`SectorMap`]; the brute scanner later restricts itself to
//! the complement of that map, so regions already consumed by a legitimate
//! walk are never re-scanned.

use crate::device::{BlockSource, DeviceError};
use crate::sector_map::SectorMap;
use crate::zfs::SECTOR_SIZE;
use parking_lot::Mutex;
use std::sync::Arc;

/// Wraps a [`BlockSource`] and records which sectors each read touches.
///
/// The tracker is transparent: the bytes it returns are exactly the bytes the
/// inner source returns. Marking is the only side effect.
pub struct SectorTracker {
    inner: Arc<dyn BlockSource>,
    map: Mutex<SectorMap>,
}

impl SectorTracker {
    pub fn new(inner: Arc<dyn BlockSource>) -> Self {
        let nsectors = inner.size().div_ceil(SECTOR_SIZE) as usize;
        Self {
            inner,
            map: Mutex::new(SectorMap::new(nsectors)),
        }
    }

    /// Returns an independent copy of the map; the tracker keeps accumulating.
    pub fn snapshot(&self) -> SectorMap {
        self.map.lock().clone()
    }

    /// Discards all accumulated marks, starting a fresh tracking session.
    pub fn reset(&self) {
        let mut map = self.map.lock();
        *map = SectorMap::new(map.sectors());
    }
}

impl BlockSource for SectorTracker {
    fn read_at(&self, offset: i64, size: usize) -> Result<Vec<u8>, DeviceError> {
        let device_size = self.inner.size();
        let resolved = if offset < 0 {
            device_size as i64 + offset
        } else {
            offset
        };

        if resolved >= 0 {
            let first = resolved as u64 / SECTOR_SIZE;
            // The within-sector remainder is intentionally not added before
            // taking the ceiling; filesystem reads are sector-aligned.
            let count = (size as u64).div_ceil(SECTOR_SIZE);
            let mut map = self.map.lock();
            let limit = map.sectors() as u64;
            for sector in first..(first + count).min(limit) {
                map.set(sector as usize);
            }
        }

        self.inner.read_at(offset, size)
    }

    fn size(&self) -> u64 {
        self.inner.size()
    }
}
