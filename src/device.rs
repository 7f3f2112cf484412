//! Read-only access to block devices and disk images.
//!
//! Everything the recovery engine reads goes through the [`BlockSource`]
//! trait, so the same parsing code works against a physical device, a raw
//! image file, or a tracking decorator. The source device is never opened
//! for writing.

use memmap2::Mmap;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when reading from a block device.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid offset {offset} for device of {size} bytes")]
    InvalidOffset { offset: i64, size: u64 },

    #[error("device error: {0}")]
    Other(String),
}

/// A source of raw block data, typically a disk or image file.
///
/// Offsets may be negative, in which case they are measured from the end of
/// the device, exactly like a seek from the end. Reads that run past the end
/// of the device are truncated rather than failed, so callers near the tail
/// get a short buffer back.
pub trait BlockSource: Send + Sync {
    /// Reads up to `size` bytes starting at `offset`.
    fn read_at(&self, offset: i64, size: usize) -> Result<Vec<u8>, DeviceError>;

    /// Total size of the device in bytes.
    fn size(&self) -> u64;
}

/// Resolves a possibly-negative offset against the device size.
pub(crate) fn resolve_offset(offset: i64, size: u64) -> Result<u64, DeviceError> {
    let resolved = if offset < 0 {
        size as i64 + offset
    } else {
        offset
    };
    if resolved < 0 || resolved as u64 >= size.max(1) {
        return Err(DeviceError::InvalidOffset { offset, size });
    }
    Ok(resolved as u64)
}

/// File-handle backed block source for devices and image files.
pub struct DiskSource {
    file: Mutex<File>,
    path: PathBuf,
    size: u64,
}

impl DiskSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeviceError::NotFound(path.display().to_string()));
        }

        let mut file = OpenOptions::new().read(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                DeviceError::PermissionDenied(path.display().to_string())
            } else {
                DeviceError::Io(e)
            }
        })?;

        let metadata = file.metadata()?;
        let size = if metadata.is_file() {
            metadata.len()
        } else {
            // Block devices report a zero-length metadata size; seek instead.
            let size = file.seek(SeekFrom::End(0))?;
            file.seek(SeekFrom::Start(0))?;
            if size == 0 {
                return Err(DeviceError::Other(format!(
                    "could not determine size of {}",
                    path.display()
                )));
            }
            size
        };

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockSource for DiskSource {
    fn read_at(&self, offset: i64, size: usize) -> Result<Vec<u8>, DeviceError> {
        let offset = resolve_offset(offset, self.size)?;
        let to_read = size.min((self.size - offset) as usize);

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; to_read];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// Memory-mapped block source.
///
/// Used by the brute scanner, which issues a large number of small reads and
/// benefits from the page cache doing the work. Falls back to [`DiskSource`]
/// at the call site when the device cannot be mapped.
pub struct MmapSource {
    mmap: Mmap,
    size: u64,
}

impl MmapSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeviceError::NotFound(path.display().to_string()));
        }

        let file = OpenOptions::new().read(true).open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::PermissionDenied {
                DeviceError::PermissionDenied(path.display().to_string())
            } else {
                DeviceError::Io(e)
            }
        })?;

        let size = file.metadata()?.len();
        if size == 0 {
            return Err(DeviceError::Other(format!(
                "cannot map zero-length source {}",
                path.display()
            )));
        }

        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| DeviceError::Other(format!("failed to map {}: {e}", path.display())))?;

        Ok(Self { mmap, size })
    }
}

impl BlockSource for MmapSource {
    fn read_at(&self, offset: i64, size: usize) -> Result<Vec<u8>, DeviceError> {
        let offset = resolve_offset(offset, self.size)? as usize;
        let end = offset.saturating_add(size).min(self.mmap.len());
        Ok(self.mmap[offset..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.size
    }
}
