//! Block pointer decoding and dereferencing.
//!
//! A block pointer is a 128-byte descriptor naming up to three copies of a
//! block (DVAs), its logical and physical sizes, and how it is compressed.
//! Dereferencing reads the first allocated copy through the caller's block
//! source and undoes the compression, so a tracking source sees every byte
//! a traversal consumes.

use super::{DATA_START, SPA_MAXBLOCKSIZE, ZfsError, lzjb};
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};

/// Length of a serialized block pointer.
pub const BLKPTR_SIZE: usize = 128;

const COMPRESS_ON: u8 = 1;
const COMPRESS_OFF: u8 = 2;
const COMPRESS_LZJB: u8 = 3;
const COMPRESS_EMPTY: u8 = 4;

/// One data virtual address: a (vdev, offset, size) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dva {
    pub vdev: u32,
    pub grid: u8,
    /// Allocated size in sectors.
    pub asize: u32,
    /// Offset in sectors, relative to the start of allocatable space.
    pub offset: u64,
    pub gang: bool,
}

impl Dva {
    fn parse(data: &[u8]) -> Dva {
        let word0 = LittleEndian::read_u64(&data[0..8]);
        let word1 = LittleEndian::read_u64(&data[8..16]);
        Dva {
            asize: (word0 & 0x00ff_ffff) as u32,
            grid: ((word0 >> 24) & 0xff) as u8,
            vdev: (word0 >> 32) as u32,
            offset: word1 & !(1 << 63),
            gang: word1 >> 63 != 0,
        }
    }

    pub fn is_unallocated(&self) -> bool {
        self.offset == 0 && self.asize == 0
    }

    /// Physical byte offset on the device.
    pub fn byte_offset(&self) -> u64 {
        (self.offset << 9) + DATA_START
    }
}

/// A 128-byte reference to a block of physical storage.
#[derive(Debug, Clone)]
pub struct BlockPointer {
    pub dvas: [Dva; 3],
    /// Logical (decompressed) size in bytes.
    pub lsize: u32,
    /// Physical (on-disk) size in bytes.
    pub psize: u32,
    pub compression: u8,
    pub checksum: u8,
    pub object_type: u8,
    pub level: u8,
    pub embedded: bool,
    pub birth_txg: u64,
    pub fill: u64,
}

impl BlockPointer {
    pub fn parse(data: &[u8]) -> Result<BlockPointer, ZfsError> {
        if data.len() < BLKPTR_SIZE {
            return Err(ZfsError::parse("block pointer truncated"));
        }

        let dvas = [
            Dva::parse(&data[0..16]),
            Dva::parse(&data[16..32]),
            Dva::parse(&data[32..48]),
        ];
        let prop = LittleEndian::read_u64(&data[48..56]);

        Ok(BlockPointer {
            dvas,
            lsize: (((prop & 0xffff) + 1) << 9) as u32,
            psize: ((((prop >> 16) & 0xffff) + 1) << 9) as u32,
            compression: ((prop >> 32) & 0x7f) as u8,
            embedded: (prop >> 39) & 1 != 0,
            checksum: ((prop >> 40) & 0xff) as u8,
            object_type: ((prop >> 48) & 0xff) as u8,
            level: ((prop >> 56) & 0x1f) as u8,
            birth_txg: LittleEndian::read_u64(&data[80..88]),
            fill: LittleEndian::read_u64(&data[88..96]),
        })
    }

    /// A hole: no copy of the block was ever allocated.
    pub fn is_hole(&self) -> bool {
        self.dvas.iter().all(Dva::is_unallocated)
    }

    /// Reads and decompresses the block this pointer names.
    pub fn dereference(&self, source: &dyn BlockSource) -> Result<Vec<u8>, ZfsError> {
        if self.embedded {
            return Err(ZfsError::parse("embedded block pointers are unsupported"));
        }
        let dva = self
            .dvas
            .iter()
            .find(|d| !d.is_unallocated())
            .ok_or_else(|| ZfsError::parse("dereference of an unallocated block pointer"))?;
        if dva.gang {
            return Err(ZfsError::parse("gang blocks are unsupported"));
        }

        let lsize = self.lsize as usize;
        let psize = self.psize as usize;
        if lsize == 0 || lsize > SPA_MAXBLOCKSIZE || psize > SPA_MAXBLOCKSIZE {
            return Err(ZfsError::parse(format!(
                "implausible block sizes (lsize {lsize}, psize {psize})"
            )));
        }

        let raw = source.read_at(dva.byte_offset() as i64, psize)?;
        if raw.len() < psize {
            return Err(ZfsError::parse("short read while dereferencing block"));
        }

        match self.compression {
            COMPRESS_OFF => Ok(raw[..lsize.min(raw.len())].to_vec()),
            COMPRESS_ON | COMPRESS_LZJB => {
                let out = lzjb::decompress(&raw, lsize)?;
                if out.len() < lsize {
                    return Err(ZfsError::parse("compressed block shorter than expected"));
                }
                Ok(out)
            }
            COMPRESS_EMPTY => Ok(vec![0u8; lsize]),
            other => Err(ZfsError::parse(format!(
                "unsupported compression algorithm {other}"
            ))),
        }
    }
}
