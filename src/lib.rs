//! zsalvage - forensic recovery for single-disk ZFS pools.
//!
//! Recovers two classes of data that the live filesystem can no longer
//! reach: files visible only through historical superblocks that are still
//! on disk, and file contents whose metadata has been unlinked but whose
//! blocks survive in unallocated sectors. The source device is only ever
//! opened read-only.

pub mod cli;
pub mod collector;
pub mod device;
pub mod recovery;
pub mod scanner;
pub mod sector_map;
pub mod tracker;
pub mod walker;
pub mod writer;
pub mod zfs;

pub use collector::{Digest, FileCollector, FileInfo};
pub use device::{BlockSource, DeviceError, DiskSource, MmapSource};
pub use recovery::Recovery;
pub use sector_map::SectorMap;
pub use tracker::SectorTracker;
pub use writer::{FileWriter, WriterError};
pub use zfs::ZfsError;
