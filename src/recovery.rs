//! The recovery orchestrator.
//!
//! Sequences a run: install the sector tracker, optionally hash the live
//! filesystem into a cache, walk every historical superblock, then scan the
//! unmarked remainder of the device for orphaned file nodes. Each phase is
//! an independent best-effort unit: a failure in one is logged and does not
//! poison collectors the others already populated.

use crate::collector::{FileCollector, FileInfo};
use crate::device::{BlockSource, DiskSource, MmapSource};
use crate::scanner::scan_dnodes;
use crate::sector_map::SectorMap;
use crate::tracker::SectorTracker;
use crate::walker::walk_files;
use crate::writer::FileWriter;
use crate::zfs::{LabelSet, ObjectType, Pool, SECTOR_SIZE, VdevInfo, ZFile, ZfsError};
use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Holds everything a recovery run needs: the device, the writer, the
/// tracker, and one collector per population of files.
pub struct Recovery {
    disk: PathBuf,
    writer: FileWriter,
    source: Arc<dyn BlockSource>,
    vdev: Option<VdevInfo>,
    files: FileCollector,
    files_uber: Option<FileCollector>,
    files_brute: Option<FileCollector>,
    tracker: Option<Arc<SectorTracker>>,
}

impl Recovery {
    /// Opens the source device read-only and reads the pool's vdev
    /// description. An unreadable device is fatal; a device without a
    /// recognizable pool is not, recovery phases simply come up empty.
    pub fn new(disk: impl AsRef<Path>, writer: FileWriter) -> Result<Recovery> {
        let disk = disk.as_ref().to_path_buf();
        let source: Arc<dyn BlockSource> = Arc::new(
            DiskSource::open(&disk)
                .with_context(|| format!("opening source device {}", disk.display()))?,
        );

        let vdev = match VdevInfo::read(&*source) {
            Ok(vdev) => {
                if let Some(name) = vdev.pool_name() {
                    info!("found pool '{name}'");
                }
                Some(vdev)
            }
            Err(err) => {
                warn!("no pool description found: {err}");
                None
            }
        };

        if let Some(vdev) = &vdev {
            if vdev.child_count() > 0 {
                bail!("multi-device pools are not supported");
            }
        }

        Ok(Recovery {
            disk,
            writer,
            source,
            vdev,
            files: FileCollector::new(),
            files_uber: None,
            files_brute: None,
            tracker: None,
        })
    }

    /// The source every filesystem traversal should read through: the
    /// tracker once installed, the bare device otherwise.
    fn reading_source(&self) -> Arc<dyn BlockSource> {
        match &self.tracker {
            Some(tracker) => Arc::clone(tracker) as Arc<dyn BlockSource>,
            None => Arc::clone(&self.source),
        }
    }

    /// Installs the sector tracker and hashes every live file so current
    /// files are not reported as finds. Also primes the sector map with
    /// every region the live walk consumed.
    pub fn build_cache(&mut self) {
        info!("building file cache");
        let tracker = Arc::new(SectorTracker::new(Arc::clone(&self.source)));
        self.tracker = Some(Arc::clone(&tracker));

        let source = tracker as Arc<dyn BlockSource>;
        if let Err(err) = walk_active(&source, &mut self.files) {
            warn!("live filesystem walk failed: {err}");
        }
    }

    /// Walks every valid historical superblock, deduplicated by transaction
    /// group, into a collector that excludes the live cache.
    pub fn find_uber(&mut self) {
        info!("running uber method");
        let mut collector = FileCollector::with_exclude(self.files.digests());
        let source = self.reading_source();

        match LabelSet::read(&*source) {
            Err(err) => warn!("superblock enumeration failed: {err}"),
            Ok(labels) => {
                let txgs: Vec<u64> = labels.uberblocks_by_txg().keys().copied().collect();
                for txg in txgs {
                    let walked = Pool::open_txg(Arc::clone(&source), &labels, txg)
                        .and_then(|pool| walk_files(&pool, &mut collector));
                    match walked {
                        Ok(()) => debug!("walked txg {txg}"),
                        Err(ZfsError::UnsupportedFormat) => warn!("found fat ZAP in txg {txg}"),
                        Err(err) => debug!("error on txg {txg}: {err}"),
                    }
                }
            }
        }

        self.files_uber = Some(collector);
    }

    /// Scans every sector the tracker never saw, parsing orphaned file
    /// nodes out of whatever still decompresses. Excludes both the live
    /// cache and the uber finds. The scanner opens its own untracked
    /// handle, memory-mapped when the device allows it.
    pub fn find_brute(&mut self) {
        info!("running brute method");
        let exclude = self.files.merge(self.files_uber.as_ref()).digests();
        let mut collector = FileCollector::with_exclude(exclude);

        let map = match &self.tracker {
            Some(tracker) => tracker.snapshot(),
            None => SectorMap::new(self.source.size().div_ceil(SECTOR_SIZE) as usize),
        };
        debug!(
            "scanning {} of {} sectors",
            map.sectors() - map.count_set(),
            map.sectors()
        );

        let scan_source: Arc<dyn BlockSource> = match MmapSource::open(&self.disk) {
            Ok(mmap) => Arc::new(mmap),
            Err(err) => {
                debug!("cannot map device ({err}), falling back to file reads");
                match DiskSource::open(&self.disk) {
                    Ok(disk) => Arc::new(disk),
                    Err(err) => {
                        warn!("brute scan could not open the device: {err}");
                        self.files_brute = Some(collector);
                        return;
                    }
                }
            }
        };

        for dnode in scan_dnodes(&*scan_source, &map) {
            if dnode.object_type != ObjectType::PlainFile {
                continue;
            }
            match ZFile::new(dnode, Arc::clone(&scan_source)) {
                Ok(file) => {
                    if let Err(err) = collector.add(FileInfo::anonymous(file)) {
                        debug!("discarded brute candidate: {err}");
                    }
                }
                Err(err) => debug!("discarded brute candidate: {err}"),
            }
        }

        self.files_brute = Some(collector);
    }

    /// Hands the uber finds to the writer.
    pub fn write_uber(&self) -> Result<usize> {
        info!("writing uber files");
        let collector = self
            .files_uber
            .as_ref()
            .context("the uber method has not run")?;
        self.writer
            .write(collector.values(), "uber")
            .context("writing uber files")
    }

    /// Hands the brute finds to the writer.
    pub fn write_brute(&self) -> Result<usize> {
        info!("writing brute files");
        let collector = self
            .files_brute
            .as_ref()
            .context("the brute method has not run")?;
        self.writer
            .write(collector.values(), "brute")
            .context("writing brute files")
    }

    pub fn vdev(&self) -> Option<&VdevInfo> {
        self.vdev.as_ref()
    }

    /// The live-file cache.
    pub fn live_files(&self) -> &FileCollector {
        &self.files
    }

    /// Files recovered from historical superblocks, once `find_uber` ran.
    pub fn uber_files(&self) -> Option<&FileCollector> {
        self.files_uber.as_ref()
    }

    /// Files recovered by the sector scan, once `find_brute` ran.
    pub fn brute_files(&self) -> Option<&FileCollector> {
        self.files_brute.as_ref()
    }

    /// Snapshot of the tracker's map, when a cache was built.
    pub fn sector_map(&self) -> Option<SectorMap> {
        self.tracker.as_ref().map(|t| t.snapshot())
    }
}

fn walk_active(source: &Arc<dyn BlockSource>, collector: &mut FileCollector) -> Result<(), ZfsError> {
    let labels = LabelSet::read(&**source)?;
    let pool = Pool::open_active(Arc::clone(source), &labels)?;
    debug!("active superblock at txg {}", pool.txg());
    walk_files(&pool, collector)
}
