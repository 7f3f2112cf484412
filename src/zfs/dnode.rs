//! Object metadata nodes and object sets.
//!
//! A dnode is the 512-byte serialized metadata record for one object: its
//! type, block-tree geometry, up to three block pointers, and a type-specific
//! bonus region. An object set is addressed through a metadnode whose data
//! blocks form the dnode array. The brute scanner parses candidate dnodes
//! out of arbitrary decompressed sectors, so `Dnode::parse` rejects anything
//! whose geometry cannot be real.

use super::blkptr::{BLKPTR_SIZE, BlockPointer};
use super::{DNODE_SIZE, ZfsError};
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};

/// Number of object types the format defines; a type byte at or beyond this
/// cannot be a dnode.
const DMU_OT_NUMTYPES: u8 = 54;

/// Upper bound on the bytes a single object may map before the reader gives
/// up. Protects speculative parsing from fabricating absurd allocations.
const MAX_OBJECT_BYTES: u64 = 1 << 30;

/// Object types the recovery engine dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    /// Unused slot sentinel.
    None,
    /// The object directory, object 1 of the meta object set.
    ObjectDirectory,
    /// A dnode array (metadnode).
    DnodeArray,
    /// A dataset directory, bonus carries the head dataset object.
    DslDir,
    /// A dataset, bonus carries the filesystem root block pointer.
    DslDataset,
    /// Plain file contents.
    PlainFile,
    /// Directory contents (a ZAP of name to object id).
    Directory,
    /// The filesystem master node.
    MasterNode,
    /// Recognized but not interesting to recovery.
    Other(u8),
}

impl ObjectType {
    pub fn from_raw(raw: u8) -> Option<ObjectType> {
        Some(match raw {
            0 => ObjectType::None,
            1 => ObjectType::ObjectDirectory,
            10 => ObjectType::DnodeArray,
            12 => ObjectType::DslDir,
            16 => ObjectType::DslDataset,
            19 => ObjectType::PlainFile,
            20 => ObjectType::Directory,
            21 => ObjectType::MasterNode,
            raw if raw < DMU_OT_NUMTYPES => ObjectType::Other(raw),
            _ => return None,
        })
    }
}

/// A parsed 512-byte object metadata node.
#[derive(Debug, Clone)]
pub struct Dnode {
    pub object_type: ObjectType,
    pub indblkshift: u8,
    pub nlevels: u8,
    pub nblkptr: u8,
    pub bonus_type: u8,
    pub checksum: u8,
    pub compress: u8,
    /// Data block size in sectors.
    pub datablkszsec: u16,
    pub bonus_len: u16,
    pub maxblkid: u64,
    pub secphys: u64,
    pub blkptrs: Vec<BlockPointer>,
    pub bonus: Vec<u8>,
}

impl Dnode {
    pub fn parse(data: &[u8]) -> Result<Dnode, ZfsError> {
        if data.len() < DNODE_SIZE {
            return Err(ZfsError::parse("dnode truncated"));
        }

        let object_type = ObjectType::from_raw(data[0])
            .ok_or_else(|| ZfsError::parse(format!("unknown object type {}", data[0])))?;
        let indblkshift = data[1];
        let nlevels = data[2];
        let nblkptr = data[3];

        if nblkptr > 3 {
            return Err(ZfsError::parse(format!(
                "implausible block pointer count {nblkptr}"
            )));
        }
        if nlevels > 8 || indblkshift > 17 {
            return Err(ZfsError::parse("implausible block-tree geometry"));
        }

        let bonus_len = LittleEndian::read_u16(&data[10..12]);
        let blkptr_end = 64 + usize::from(nblkptr) * BLKPTR_SIZE;
        if blkptr_end + usize::from(bonus_len) > DNODE_SIZE {
            return Err(ZfsError::parse("bonus region overruns the dnode"));
        }

        let mut blkptrs = Vec::with_capacity(usize::from(nblkptr));
        for i in 0..usize::from(nblkptr) {
            let start = 64 + i * BLKPTR_SIZE;
            blkptrs.push(BlockPointer::parse(&data[start..start + BLKPTR_SIZE])?);
        }

        Ok(Dnode {
            object_type,
            indblkshift,
            nlevels,
            nblkptr,
            bonus_type: data[4],
            checksum: data[5],
            compress: data[6],
            datablkszsec: LittleEndian::read_u16(&data[8..10]),
            bonus_len,
            maxblkid: LittleEndian::read_u64(&data[16..24]),
            secphys: LittleEndian::read_u64(&data[24..32]),
            blkptrs,
            bonus: data[blkptr_end..blkptr_end + usize::from(bonus_len)].to_vec(),
        })
    }

    /// Data block size in bytes.
    pub fn block_size(&self) -> usize {
        usize::from(self.datablkszsec) * 512
    }

    /// Reads logical data block `blkid`, descending indirect blocks as
    /// needed. Holes come back zero-filled at the block size.
    pub fn read_block(&self, source: &dyn BlockSource, blkid: u64) -> Result<Vec<u8>, ZfsError> {
        let block_size = self.block_size();
        if block_size == 0 {
            return Err(ZfsError::parse("object has a zero data block size"));
        }
        if self.nlevels == 0 {
            return Err(ZfsError::parse("object has no block tree"));
        }

        let entries_per_block = if self.nlevels > 1 {
            let indirect_size = 1usize << self.indblkshift;
            if indirect_size < BLKPTR_SIZE {
                return Err(ZfsError::parse("indirect block smaller than a pointer"));
            }
            (indirect_size / BLKPTR_SIZE) as u64
        } else {
            1
        };

        let mut span = entries_per_block.pow(u32::from(self.nlevels) - 1);
        let top = (blkid / span) as usize;
        if top >= self.blkptrs.len() {
            return Err(ZfsError::parse("block id beyond the dnode's pointers"));
        }

        let mut bp = self.blkptrs[top].clone();
        let mut rest = blkid % span;
        let mut level = self.nlevels - 1;
        while level > 0 {
            if bp.is_hole() {
                return Ok(vec![0u8; block_size]);
            }
            let indirect = bp.dereference(source)?;
            span /= entries_per_block;
            let slot = (rest / span) as usize * BLKPTR_SIZE;
            rest %= span;
            if slot + BLKPTR_SIZE > indirect.len() {
                return Err(ZfsError::parse("indirect slot out of range"));
            }
            bp = BlockPointer::parse(&indirect[slot..slot + BLKPTR_SIZE])?;
            level -= 1;
        }

        if bp.is_hole() {
            Ok(vec![0u8; block_size])
        } else {
            bp.dereference(source)
        }
    }

    /// Reads the object's full data, blocks 0 through `maxblkid`.
    pub fn read_all(&self, source: &dyn BlockSource) -> Result<Vec<u8>, ZfsError> {
        let nblocks = self.maxblkid + 1;
        let total = nblocks.saturating_mul(self.block_size() as u64);
        if total > MAX_OBJECT_BYTES {
            return Err(ZfsError::parse(format!("object maps {total} bytes")));
        }

        let mut data = Vec::with_capacity(total as usize);
        for blkid in 0..nblocks {
            data.extend_from_slice(&self.read_block(source, blkid)?);
        }
        Ok(data)
    }
}

/// An object set: a metadnode whose data blocks hold the dnode array.
#[derive(Debug, Clone)]
pub struct ObjectSet {
    meta: Dnode,
}

impl ObjectSet {
    /// Parses an object set from the contents of its root block.
    pub fn parse(data: &[u8]) -> Result<ObjectSet, ZfsError> {
        if data.len() < DNODE_SIZE {
            return Err(ZfsError::parse("object set block truncated"));
        }
        let meta = Dnode::parse(&data[..DNODE_SIZE])?;
        if meta.object_type != ObjectType::DnodeArray {
            return Err(ZfsError::parse("object set has no metadnode"));
        }
        Ok(ObjectSet { meta })
    }

    /// Dnodes held per data block of the array.
    fn objects_per_block(&self) -> u64 {
        u64::from(self.meta.datablkszsec)
    }

    /// Reads object `id` out of the dnode array.
    pub fn object(&self, source: &dyn BlockSource, id: u64) -> Result<Dnode, ZfsError> {
        let per_block = self.objects_per_block();
        if per_block == 0 {
            return Err(ZfsError::parse("metadnode has a zero block size"));
        }
        if id >= (self.meta.maxblkid + 1) * per_block {
            return Err(ZfsError::parse(format!("object {id} out of range")));
        }

        let block = self.meta.read_block(source, id / per_block)?;
        let offset = (id % per_block) as usize * DNODE_SIZE;
        if offset + DNODE_SIZE > block.len() {
            return Err(ZfsError::parse("dnode array block truncated"));
        }
        Dnode::parse(&block[offset..offset + DNODE_SIZE])
    }
}
