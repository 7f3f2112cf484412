//! Opening a pool view at a chosen superblock.
//!
//! A pool view is the descent from one superblock's root block pointer down
//! to the head dataset's active filesystem: meta object set, object
//! directory, dataset directory, dataset, filesystem object set, master
//! node, root directory. Opening at a historical transaction group is the
//! same descent from a different slot.

use super::blkptr::BlockPointer;
use super::dnode::{Dnode, ObjectSet};
use super::label::LabelSet;
use super::zap::MicroZap;
use super::ZfsError;
use crate::device::BlockSource;
use byteorder::{ByteOrder, LittleEndian};
use std::sync::Arc;

/// Object id of the object directory within the meta object set, and of the
/// master node within a filesystem object set.
const FIRST_OBJECT_ID: u64 = 1;

/// Offset of the head dataset object id within a dataset directory's bonus.
const DSL_DIR_HEAD_DATASET: usize = 8;

/// Offset of the filesystem root block pointer within a dataset's bonus.
const DSL_DATASET_BP: usize = 128;

/// One opened pool state, pinned to a superblock's transaction group.
pub struct Pool {
    source: Arc<dyn BlockSource>,
    mos: ObjectSet,
    fs: ObjectSet,
    root_dir: u64,
    txg: u64,
}

impl Pool {
    /// Opens the pool at its active superblock.
    pub fn open_active(source: Arc<dyn BlockSource>, labels: &LabelSet) -> Result<Pool, ZfsError> {
        let (label, ub) = labels
            .best()
            .ok_or_else(|| ZfsError::parse("no valid superblock on device"))?;
        let rootbp = label.root_pointer(ub)?;
        Self::open_root(source, &rootbp, ub.txg)
    }

    /// Opens the pool at the superblock holding `txg`.
    pub fn open_txg(
        source: Arc<dyn BlockSource>,
        labels: &LabelSet,
        txg: u64,
    ) -> Result<Pool, ZfsError> {
        let (label, ub) = labels
            .find_txg(txg)
            .ok_or_else(|| ZfsError::parse(format!("no superblock with txg {txg}")))?;
        let rootbp = label.root_pointer(ub)?;
        Self::open_root(source, &rootbp, txg)
    }

    fn open_root(
        source: Arc<dyn BlockSource>,
        rootbp: &BlockPointer,
        txg: u64,
    ) -> Result<Pool, ZfsError> {
        let mos = ObjectSet::parse(&rootbp.dereference(&*source)?)?;

        let objdir_dnode = mos.object(&*source, FIRST_OBJECT_ID)?;
        let objdir = MicroZap::from_dnode(&objdir_dnode, &*source)?;
        let dsl_dir_obj = objdir
            .get("root_dataset")
            .ok_or_else(|| ZfsError::parse("object directory has no root_dataset"))?;

        let dsl_dir = mos.object(&*source, dsl_dir_obj)?;
        if dsl_dir.bonus.len() < DSL_DIR_HEAD_DATASET + 8 {
            return Err(ZfsError::parse("dataset directory bonus truncated"));
        }
        let head_obj = LittleEndian::read_u64(
            &dsl_dir.bonus[DSL_DIR_HEAD_DATASET..DSL_DIR_HEAD_DATASET + 8],
        );

        let dataset = mos.object(&*source, head_obj)?;
        if dataset.bonus.len() < DSL_DATASET_BP + 128 {
            return Err(ZfsError::parse("dataset bonus truncated"));
        }
        let fs_bp = BlockPointer::parse(&dataset.bonus[DSL_DATASET_BP..DSL_DATASET_BP + 128])?;

        let fs = ObjectSet::parse(&fs_bp.dereference(&*source)?)?;
        let master_dnode = fs.object(&*source, FIRST_OBJECT_ID)?;
        let master = MicroZap::from_dnode(&master_dnode, &*source)?;
        let root_dir = master
            .get("ROOT")
            .ok_or_else(|| ZfsError::parse("master node has no ROOT entry"))?;

        Ok(Pool {
            source,
            mos,
            fs,
            root_dir,
            txg,
        })
    }

    /// Object id of the filesystem's root directory.
    pub fn root_dir(&self) -> u64 {
        self.root_dir
    }

    /// Transaction group this view was opened at.
    pub fn txg(&self) -> u64 {
        self.txg
    }

    /// The meta object set of this view.
    pub fn mos(&self) -> &ObjectSet {
        &self.mos
    }

    /// Reads an object out of the filesystem object set.
    pub fn object(&self, id: u64) -> Result<Dnode, ZfsError> {
        self.fs.object(&*self.source, id)
    }

    /// Parses the ZAP held by a directory dnode.
    pub fn directory(&self, dnode: &Dnode) -> Result<MicroZap, ZfsError> {
        MicroZap::from_dnode(dnode, &*self.source)
    }

    pub fn source(&self) -> &Arc<dyn BlockSource> {
        &self.source
    }
}
