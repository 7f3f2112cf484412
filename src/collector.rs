//! Content-addressed collection of recovered files.
//!
//! Three populations of files come out of a run: live, historical, and
//! brute-scavenged. The only identity that survives all three is the hash of
//! the file's contents, so the collector keys on a SHA-256 digest and holds
//! at most one file per digest. A collector can carry an exclusion set of
//! digests; adds whose digest appears there are discarded silently, which is
//! how historical finds suppress live files and brute finds suppress both.

use crate::zfs::{ZFile, ZfsError};
use sha2::{Digest as _, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// SHA-256 digest of a file's full contents.
pub type Digest = [u8; 32];

/// A recovered file plus its path-derived name, when one is known.
///
/// Files found by walking a directory tree carry the joined path; files
/// scavenged out of unallocated sectors have no name at all.
#[derive(Debug, Clone)]
pub struct FileInfo {
    file: ZFile,
    name: Option<String>,
}

impl FileInfo {
    pub fn new(file: ZFile, name: Option<String>) -> FileInfo {
        FileInfo { file, name }
    }

    pub fn anonymous(file: ZFile) -> FileInfo {
        FileInfo { file, name: None }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn file(&self) -> &ZFile {
        &self.file
    }

    /// Materializes the file's contents.
    pub fn read(&self) -> Result<Vec<u8>, ZfsError> {
        self.file.read()
    }
}

/// A deduplicating, content-addressed set of [`FileInfo`]s.
#[derive(Debug, Clone, Default)]
pub struct FileCollector {
    entries: HashMap<Digest, FileInfo>,
    exclude: HashSet<Digest>,
}

impl FileCollector {
    pub fn new() -> FileCollector {
        FileCollector::default()
    }

    /// A collector that silently drops any file whose digest is in `exclude`.
    pub fn with_exclude(exclude: HashSet<Digest>) -> FileCollector {
        FileCollector {
            entries: HashMap::new(),
            exclude,
        }
    }

    /// Hashes the file's contents and inserts it unless the digest is
    /// already present here or in the exclusion set. Returns whether the
    /// file was actually added.
    pub fn add(&mut self, info: FileInfo) -> Result<bool, ZfsError> {
        let data = info.read()?;
        let digest: Digest = Sha256::digest(&data).into();
        let prefix = &hex::encode(digest)[..6];

        if self.entries.contains_key(&digest) {
            debug!("digest {prefix}: file already collected");
            Ok(false)
        } else if self.exclude.contains(&digest) {
            debug!("digest {prefix}: file present in exclusions");
            Ok(false)
        } else {
            debug!("digest {prefix}: collected file");
            self.entries.insert(digest, info);
            Ok(true)
        }
    }

    /// A new collector whose key set is the union of `self` and `other`;
    /// `None` on the right is treated as empty. Exclusion sets do not carry
    /// over: the result is used purely as a key set.
    pub fn merge(&self, other: Option<&FileCollector>) -> FileCollector {
        let mut entries = self.entries.clone();
        if let Some(other) = other {
            for (digest, info) in &other.entries {
                entries.insert(*digest, info.clone());
            }
        }
        FileCollector {
            entries,
            exclude: HashSet::new(),
        }
    }

    /// The digests currently collected.
    pub fn digests(&self) -> HashSet<Digest> {
        self.entries.keys().copied().collect()
    }

    pub fn contains(&self, digest: &Digest) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn values(&self) -> impl Iterator<Item = &FileInfo> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
