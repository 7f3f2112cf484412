//! On-disk structures of the copy-on-write pooled filesystem.
//!
//! This module tree is the structure reader the recovery engine is built on:
//! labels and their superblock arrays, block pointers, object sets and
//! dnodes, micro ZAP directories, and the LZJB codec the format compresses
//! metadata with. Everything here is parsing only; nothing writes to the
//! source device.

pub mod blkptr;
pub mod dnode;
pub mod file;
pub mod label;
pub mod lzjb;
pub mod nvlist;
pub mod pool;
pub mod zap;

pub use blkptr::BlockPointer;
pub use dnode::{Dnode, ObjectSet, ObjectType};
pub use file::{ZFile, Znode};
pub use label::{Label, LabelSet, Uberblock, VdevInfo};
pub use nvlist::{NvList, NvValue};
pub use pool::Pool;
pub use zap::MicroZap;

use crate::device::DeviceError;
use thiserror::Error;

/// Sector size of the format; every on-disk allocation is a multiple of it.
pub const SECTOR_SIZE: u64 = 512;

/// Serialized size of a single object-metadata node.
pub const DNODE_SIZE: usize = 512;

/// Size of one label region; four of them sit at fixed device positions.
pub const LABEL_SIZE: usize = 256 * 1024;

/// Size of one superblock slot within a label.
pub const UBERBLOCK_SIZE: usize = 1024;

/// Number of superblock slots per label.
pub const UBERBLOCKS_PER_LABEL: usize = 128;

/// Magic marker identifying a superblock slot.
pub const UBERBLOCK_MAGIC: u64 = 0x00ba_b10c;

/// Highest pool version this reader understands.
pub const SPA_VERSION_MAX: u64 = 28;

/// Offset of the name/value vdev description within the first label.
pub const VDEV_NVLIST_OFFSET: i64 = 16 * 1024;

/// Length of the name/value vdev description region.
pub const VDEV_NVLIST_SIZE: usize = 112 * 1024;

/// Byte offset where allocatable space begins: two front labels plus the
/// boot block. DVA offsets are relative to this point.
pub const DATA_START: u64 = 4 * 1024 * 1024;

/// Largest logical block the format produces.
pub const SPA_MAXBLOCKSIZE: usize = 128 * 1024;

/// Errors produced while interpreting on-disk structures.
#[derive(Debug, Error)]
pub enum ZfsError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A directory uses the fat hash-table encoding, which this reader does
    /// not support. Callers abandon the current superblock and move on.
    #[error("fat ZAP directories are not supported")]
    UnsupportedFormat,

    #[error("{0}")]
    Parse(String),
}

impl ZfsError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        ZfsError::Parse(msg.into())
    }
}
