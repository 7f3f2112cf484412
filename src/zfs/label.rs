//! Labels, superblock enumeration, and the pool's vdev description.
//!
//! Four 256 KiB labels sit at fixed positions: two at the front of the
//! device, two at the end (addressed with negative, end-relative offsets).
//! Each carries the pool's name/value description and an array of 128
//! superblock slots. Every slot is enumerated up front so any transaction
//! group can be revisited; root block pointers are decoded lazily from the
//! retained slot bytes only when a caller actually wants to walk that tree.

use super::blkptr::BlockPointer;
use super::nvlist::NvList;
use super::{
    LABEL_SIZE, SPA_VERSION_MAX, UBERBLOCK_MAGIC, UBERBLOCK_SIZE, UBERBLOCKS_PER_LABEL,
    VDEV_NVLIST_OFFSET, VDEV_NVLIST_SIZE, ZfsError,
};
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use tracing::debug;

const NVLIST_OFFSET: usize = 16 * 1024;
const NVLIST_END: usize = 128 * 1024;

/// A superblock: the root descriptor of one pool state.
///
/// Only the header fields are parsed at enumeration time. The root block
/// pointer lives in slot bytes 40..168 and is decoded on demand through
/// [`Label::root_pointer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uberblock {
    pub magic: u64,
    pub version: u64,
    pub txg: u64,
    pub guid_sum: u64,
    pub timestamp: u64,
    /// Index of the slot this superblock came from.
    pub slot: usize,
}

impl Uberblock {
    fn parse(data: &[u8], slot: usize) -> Uberblock {
        Uberblock {
            magic: LittleEndian::read_u64(&data[0..8]),
            version: LittleEndian::read_u64(&data[8..16]),
            txg: LittleEndian::read_u64(&data[16..24]),
            guid_sum: LittleEndian::read_u64(&data[24..32]),
            timestamp: LittleEndian::read_u64(&data[32..40]),
            slot,
        }
    }

    /// Whether the slot holds a plausible superblock.
    pub fn is_valid(&self) -> bool {
        self.magic == UBERBLOCK_MAGIC && self.version >= 1 && self.version <= SPA_VERSION_MAX
    }

    /// Format ordering: higher (txg, timestamp) wins.
    pub fn better_than(&self, other: Option<&Uberblock>) -> bool {
        match other {
            None => true,
            Some(other) => (self.txg, self.timestamp) > (other.txg, other.timestamp),
        }
    }
}

/// One parsed label region.
pub struct Label {
    /// Which of the four fixed positions this label came from.
    pub index: usize,
    /// The pool's name/value description.
    pub nv: NvList,
    /// Every slot of the superblock array, valid or not.
    pub uberblocks: Vec<Uberblock>,
    /// Raw superblock array, retained for lazy root-pointer decoding.
    slots: Vec<u8>,
}

impl Label {
    pub fn parse(index: usize, data: &[u8]) -> Result<Label, ZfsError> {
        if data.len() < LABEL_SIZE {
            return Err(ZfsError::parse("label region truncated"));
        }

        let nv = NvList::unpack(&data[NVLIST_OFFSET..NVLIST_END])?;
        let slots = data[NVLIST_END..LABEL_SIZE].to_vec();
        let uberblocks = (0..UBERBLOCKS_PER_LABEL)
            .map(|slot| Uberblock::parse(&slots[slot * UBERBLOCK_SIZE..], slot))
            .collect();

        Ok(Label {
            index,
            nv,
            uberblocks,
            slots,
        })
    }

    /// The best valid superblock in this label, if any.
    pub fn best(&self) -> Option<&Uberblock> {
        let mut best: Option<&Uberblock> = None;
        for ub in self.uberblocks.iter().filter(|ub| ub.is_valid()) {
            if ub.better_than(best) {
                best = Some(ub);
            }
        }
        best
    }

    /// Decodes the root block pointer of `ub` from the retained slot bytes.
    /// Idempotent; never called during enumeration.
    pub fn root_pointer(&self, ub: &Uberblock) -> Result<BlockPointer, ZfsError> {
        let start = ub.slot * UBERBLOCK_SIZE + 40;
        BlockPointer::parse(&self.slots[start..start + 128])
    }
}

/// All labels found on a device.
pub struct LabelSet {
    pub labels: Vec<Label>,
}

impl LabelSet {
    /// Reads the four fixed label positions. Regions that cannot be read or
    /// parsed are skipped; a device yielding no label at all is an error.
    pub fn read(source: &dyn BlockSource) -> Result<LabelSet, ZfsError> {
        let positions: [i64; 4] = [
            0,
            LABEL_SIZE as i64,
            -2 * LABEL_SIZE as i64,
            -(LABEL_SIZE as i64),
        ];

        let mut labels = Vec::new();
        for (index, &offset) in positions.iter().enumerate() {
            match source.read_at(offset, LABEL_SIZE) {
                Ok(data) if data.len() == LABEL_SIZE => {
                    match Label::parse(index, &data) {
                        Ok(label) => labels.push(label),
                        Err(err) => debug!("label {index} unparseable: {err}"),
                    }
                }
                Ok(_) => debug!("label {index} truncated"),
                Err(err) => debug!("label {index} unreadable: {err}"),
            }
        }

        if labels.is_empty() {
            return Err(ZfsError::parse("no readable label on device"));
        }
        Ok(LabelSet { labels })
    }

    /// The active superblock: the best valid slot across all labels.
    pub fn best(&self) -> Option<(&Label, &Uberblock)> {
        let mut best: Option<(&Label, &Uberblock)> = None;
        for label in &self.labels {
            if let Some(ub) = label.best() {
                if ub.better_than(best.map(|(_, b)| b)) {
                    best = Some((label, ub));
                }
            }
        }
        best
    }

    /// Every valid superblock, deduplicated by transaction group. The first
    /// occurrence of a txg wins; labels normally agree anyway.
    pub fn uberblocks_by_txg(&self) -> BTreeMap<u64, (&Label, &Uberblock)> {
        let mut by_txg = BTreeMap::new();
        for label in &self.labels {
            for ub in label.uberblocks.iter().filter(|ub| ub.is_valid()) {
                by_txg.entry(ub.txg).or_insert((label, ub));
            }
        }
        by_txg
    }

    /// Finds the slot holding `txg`: the first matching slot within each
    /// label, the last label winning when several agree.
    pub fn find_txg(&self, txg: u64) -> Option<(&Label, &Uberblock)> {
        let mut found = None;
        for label in &self.labels {
            if let Some(ub) = label.uberblocks.iter().find(|ub| ub.txg == txg) {
                found = Some((label, ub));
            }
        }
        found
    }
}

/// The pool's vdev description, read from the name/value region of the
/// first label.
#[derive(Debug, Clone)]
pub struct VdevInfo {
    nv: NvList,
}

impl VdevInfo {
    pub fn read(source: &dyn BlockSource) -> Result<VdevInfo, ZfsError> {
        let data = source.read_at(VDEV_NVLIST_OFFSET, VDEV_NVLIST_SIZE)?;
        Ok(VdevInfo {
            nv: NvList::unpack(&data)?,
        })
    }

    pub fn pool_name(&self) -> Option<&str> {
        self.nv.get_str("name")
    }

    pub fn pool_guid(&self) -> Option<u64> {
        self.nv.get_u64("pool_guid")
    }

    pub fn version(&self) -> Option<u64> {
        self.nv.get_u64("version")
    }

    pub fn vdev_tree(&self) -> Option<&NvList> {
        self.nv.get_list("vdev_tree")
    }

    /// Number of child vdevs under the top-level vdev. Anything above zero
    /// means a multi-device pool, which this tool does not read.
    pub fn child_count(&self) -> usize {
        self.vdev_tree()
            .and_then(|tree| tree.get_lists("children"))
            .map_or(0, |children| children.len())
    }
}
