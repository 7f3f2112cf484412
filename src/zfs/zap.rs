//! Micro ZAP parsing.
//!
//! Directories and the pool's bookkeeping objects store their name-to-id
//! maps as ZAP objects. Only the compact "micro" encoding is supported: a
//! 64-byte header followed by fixed 64-byte entries. The fat encoding is a
//! distinguished [`ZfsError::UnsupportedFormat`] so callers can abandon the
//! superblock that referenced it instead of crashing.

use super::dnode::Dnode;
use super::ZfsError;
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};

const ZBT_MICRO: u64 = (1 << 63) + 3;
const ZBT_HEADER: u64 = (1 << 63) + 1;

const MZAP_HEADER_LEN: usize = 64;
const MZAP_ENT_LEN: usize = 64;
const MZAP_NAME_OFFSET: usize = 14;

/// Directory-entry values carry the child object id in their low 48 bits;
/// the top bits encode the entry's file type.
pub const DIRENT_OBJECT_MASK: u64 = (1 << 48) - 1;

/// One name-to-value entry of a micro ZAP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MzapEntry {
    pub name: String,
    pub value: u64,
}

/// A parsed micro ZAP object.
#[derive(Debug, Clone, Default)]
pub struct MicroZap {
    entries: Vec<MzapEntry>,
}

impl MicroZap {
    pub fn parse(data: &[u8]) -> Result<MicroZap, ZfsError> {
        if data.len() < MZAP_HEADER_LEN {
            return Err(ZfsError::parse("ZAP block truncated"));
        }

        let block_type = LittleEndian::read_u64(&data[0..8]);
        if block_type == ZBT_HEADER {
            return Err(ZfsError::UnsupportedFormat);
        }
        if block_type != ZBT_MICRO {
            return Err(ZfsError::parse("not a ZAP block"));
        }

        let mut entries = Vec::new();
        for chunk in data[MZAP_HEADER_LEN..].chunks_exact(MZAP_ENT_LEN) {
            let value = LittleEndian::read_u64(&chunk[0..8]);
            let name_bytes = &chunk[MZAP_NAME_OFFSET..];
            let len = name_bytes
                .iter()
                .position(|&b| b == 0)
                .unwrap_or(name_bytes.len());
            if len == 0 {
                continue;
            }
            let Ok(name) = std::str::from_utf8(&name_bytes[..len]) else {
                continue;
            };
            entries.push(MzapEntry {
                name: name.to_string(),
                value,
            });
        }

        Ok(MicroZap { entries })
    }

    /// Reads and parses the ZAP held by `dnode`.
    pub fn from_dnode(dnode: &Dnode, source: &dyn BlockSource) -> Result<MicroZap, ZfsError> {
        let data = dnode.read_all(source)?;
        MicroZap::parse(&data)
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MzapEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
