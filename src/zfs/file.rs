//! Plain-file objects and their bonus attributes.

use super::dnode::Dnode;
use super::ZfsError;
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};
use std::fmt;
use std::sync::Arc;

/// Parsed filesystem attributes from a plain-file dnode's bonus region.
///
/// Timestamps are (seconds, nanoseconds) pairs; only the seconds half is
/// used when restoring times on recovered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Znode {
    pub atime: [u64; 2],
    pub mtime: [u64; 2],
    pub ctime: [u64; 2],
    pub crtime: [u64; 2],
    pub generation: u64,
    pub mode: u64,
    pub size: u64,
    pub parent: u64,
    pub links: u64,
}

impl Znode {
    pub fn parse(bonus: &[u8]) -> Result<Znode, ZfsError> {
        if bonus.len() < 104 {
            return Err(ZfsError::parse("bonus region too short for file attributes"));
        }
        let pair = |at: usize| {
            [
                LittleEndian::read_u64(&bonus[at..at + 8]),
                LittleEndian::read_u64(&bonus[at + 8..at + 16]),
            ]
        };
        Ok(Znode {
            atime: pair(0),
            mtime: pair(16),
            ctime: pair(32),
            crtime: pair(48),
            generation: LittleEndian::read_u64(&bonus[64..72]),
            mode: LittleEndian::read_u64(&bonus[72..80]),
            size: LittleEndian::read_u64(&bonus[80..88]),
            parent: LittleEndian::read_u64(&bonus[88..96]),
            links: LittleEndian::read_u64(&bonus[96..104]),
        })
    }
}

/// A plain-file object: its dnode plus parsed bonus attributes, bound to the
/// block source its data lives on.
#[derive(Clone)]
pub struct ZFile {
    dnode: Dnode,
    znode: Znode,
    source: Arc<dyn BlockSource>,
}

impl ZFile {
    pub fn new(dnode: Dnode, source: Arc<dyn BlockSource>) -> Result<ZFile, ZfsError> {
        let znode = Znode::parse(&dnode.bonus)?;
        Ok(ZFile {
            dnode,
            znode,
            source,
        })
    }

    pub fn dnode(&self) -> &Dnode {
        &self.dnode
    }

    pub fn znode(&self) -> &Znode {
        &self.znode
    }

    /// Materializes the file's contents through its block pointers.
    pub fn read(&self) -> Result<Vec<u8>, ZfsError> {
        let size = self.znode.size as usize;
        let mut data = self.dnode.read_all(&*self.source)?;
        if size > data.len() {
            return Err(ZfsError::parse(format!(
                "file claims {size} bytes but maps only {}",
                data.len()
            )));
        }
        data.truncate(size);
        Ok(data)
    }
}

impl fmt::Debug for ZFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ZFile")
            .field("size", &self.znode.size)
            .field("mtime", &self.znode.mtime[0])
            .field("maxblkid", &self.dnode.maxblkid)
            .finish()
    }
}
