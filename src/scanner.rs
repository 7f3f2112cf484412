//! Brute scan of unallocated sectors for orphaned object metadata.
//!
//! Metadata blocks are LZJB-compressed on disk, so the scanner speculatively
//! decompresses two sectors at every unmarked position and tries to parse
//! dnodes out of the result. Reading two sectors catches nodes that straddle
//! a sector boundary; the map snapshot guarantees regions already consumed
//! by a legitimate walk are never revisited. Everything that fails to
//! decompress or parse is silently skipped; on a device full of
//! unallocated noise that is the overwhelmingly common case.

use crate::device::BlockSource;
use crate::sector_map::SectorMap;
use crate::zfs::{Dnode, ObjectType, SECTOR_SIZE, SPA_MAXBLOCKSIZE, DNODE_SIZE, lzjb};
use tracing::debug;

/// Bytes read at each unmarked sector: the compression unit is at least one
/// sector and a node may straddle into the next.
const SCAN_READ_SIZE: usize = 1024;

/// Scans every unmarked sector of `map`, returning each parseable dnode
/// whose type is not the unused-slot sentinel.
pub fn scan_dnodes(source: &dyn BlockSource, map: &SectorMap) -> Vec<Dnode> {
    let mut dnodes = Vec::new();

    for sector in map.unset_sectors() {
        let offset = sector as u64 * SECTOR_SIZE;
        let Ok(raw) = source.read_at(offset as i64, SCAN_READ_SIZE) else {
            continue;
        };
        let Ok(data) = lzjb::decompress(&raw, SPA_MAXBLOCKSIZE) else {
            continue;
        };
        if data.is_empty() {
            continue;
        }

        for chunk in data.chunks_exact(DNODE_SIZE) {
            let Ok(dnode) = Dnode::parse(chunk) else {
                continue;
            };
            if dnode.object_type != ObjectType::None {
                debug!(
                    "candidate {:?} dnode at sector {sector}",
                    dnode.object_type
                );
                dnodes.push(dnode);
            }
        }
    }

    dnodes
}
