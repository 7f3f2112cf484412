//! Depth-first traversal of a pool view's directory tree.
//!
//! Walks from the filesystem root, reconstructing each file's path from an
//! explicit component stack (pushed before descent, popped on return). Plain
//! files are emitted into the collector under their joined path; object
//! types the tool does not recover are skipped.

use crate::collector::{FileCollector, FileInfo};
use crate::zfs::zap::DIRENT_OBJECT_MASK;
use crate::zfs::{ObjectType, Pool, ZFile, ZfsError};
use std::sync::Arc;
use tracing::trace;

/// Adds every plain file reachable from the pool's root directory to the
/// collector. A failure anywhere in the tree abandons this walk; the caller
/// decides whether that poisons anything else.
pub fn walk_files(pool: &Pool, collector: &mut FileCollector) -> Result<(), ZfsError> {
    let mut path = Vec::new();
    walk_dir(pool, pool.root_dir(), &mut path, collector)
}

fn walk_dir(
    pool: &Pool,
    dir_obj: u64,
    path: &mut Vec<String>,
    collector: &mut FileCollector,
) -> Result<(), ZfsError> {
    let dnode = pool.object(dir_obj)?;
    if dnode.object_type != ObjectType::Directory {
        return Err(ZfsError::parse(format!(
            "object {dir_obj} is not a directory"
        )));
    }

    let entries = pool.directory(&dnode)?;
    for entry in entries.iter() {
        path.push(entry.name.clone());

        let child_obj = entry.value & DIRENT_OBJECT_MASK;
        let child = pool.object(child_obj)?;
        match child.object_type {
            ObjectType::Directory => {
                walk_dir(pool, child_obj, path, collector)?;
            }
            ObjectType::PlainFile => {
                let name = path.join("_");
                trace!("found file {name}");
                let file = ZFile::new(child, Arc::clone(pool.source()))?;
                collector.add(FileInfo::new(file, Some(name)))?;
            }
            _ => {}
        }

        path.pop();
    }
    Ok(())
}
