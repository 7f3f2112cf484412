//! Synthetic single-disk pool images for end-to-end tests.
//!
//! The builder fabricates just enough of the on-disk format for the reader:
//! four labels with an XDR vdev description and a superblock array, plus one
//! complete object tree per transaction group (meta object set, dataset
//! chain, filesystem object set, directories, files). Data blocks are stored
//! uncompressed; planted "deleted" metadata is stored in the literal-only
//! LZJB encoding so the brute scanner can find it.

#![allow(dead_code)]

use byteorder::{ByteOrder, LittleEndian};
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::NamedTempFile;
use zsalvage::zfs::{DATA_START, DNODE_SIZE, LABEL_SIZE, UBERBLOCK_MAGIC, UBERBLOCK_SIZE};

const COMPRESS_OFF: u8 = 2;
const ZBT_MICRO: u64 = (1 << 63) + 3;
const ZBT_HEADER: u64 = (1 << 63) + 1;

const DMU_OT_OBJECT_DIRECTORY: u8 = 1;
const DMU_OT_DNODE: u8 = 10;
const DMU_OT_DSL_DIR: u8 = 12;
const DMU_OT_DSL_DATASET: u8 = 16;
const DMU_OT_ZNODE: u8 = 17;
const DMU_OT_PLAIN_FILE: u8 = 19;
const DMU_OT_DIRECTORY: u8 = 20;
const DMU_OT_MASTER_NODE: u8 = 21;

/// One file of a pool state, addressed by a `/`-separated path.
pub struct FileSpec {
    pub path: String,
    pub contents: Vec<u8>,
    pub atime: u64,
    pub mtime: u64,
}

pub fn file(path: &str, contents: &[u8], atime: u64, mtime: u64) -> FileSpec {
    FileSpec {
        path: path.to_string(),
        contents: contents.to_vec(),
        atime,
        mtime,
    }
}

pub struct ImageBuilder {
    data: Vec<u8>,
    alloc: u64,
    ub_array: Vec<u8>,
    pool_guid: u64,
}

impl ImageBuilder {
    pub fn new(size: usize) -> ImageBuilder {
        assert!(size >= 8 * 1024 * 1024, "image too small for four labels");
        ImageBuilder {
            data: vec![0u8; size],
            // DVA offset zero reads as unallocated, so allocation starts one
            // sector past the start of usable space.
            alloc: DATA_START + 512,
            ub_array: vec![0u8; LABEL_SIZE / 2],
            pool_guid: 0x00de_fec8_ed15_c001,
        }
    }

    /// Writes `block` at the next free 512-aligned position and returns a
    /// raw block pointer to it (compression off).
    fn put_block(&mut self, block: &[u8]) -> [u8; 128] {
        let padded = block.len().div_ceil(512).max(1) * 512;
        let offset = self.alloc;
        assert!(
            (offset as usize + padded) < self.data.len() - LABEL_SIZE * 2,
            "image allocation ran into the trailing labels"
        );
        self.data[offset as usize..offset as usize + block.len()].copy_from_slice(block);
        self.alloc += padded as u64;
        raw_blkptr(offset, padded)
    }

    /// Writes raw bytes at the next free 512-aligned position, advancing the
    /// allocator. Used for planted metadata no tree references.
    pub fn place_raw(&mut self, bytes: &[u8]) -> u64 {
        let padded = bytes.len().div_ceil(512).max(1) * 512;
        let offset = self.alloc;
        assert!((offset as usize + padded) < self.data.len() - LABEL_SIZE * 2);
        self.data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
        self.alloc += padded as u64;
        offset
    }

    /// Adds a complete pool state at `txg`: filesystem tree, dataset chain,
    /// meta object set, and a superblock slot pointing at it all.
    pub fn add_state(&mut self, files: &[FileSpec], txg: u64, timestamp: u64) {
        let fs_bp = self.build_fs_objset(files);
        let root_bp = self.build_mos(Some(fs_bp));
        self.write_uberblock(txg, timestamp, &root_bp);
    }

    /// Adds a state whose object directory uses the fat ZAP encoding, which
    /// the reader refuses.
    pub fn add_fat_state(&mut self, txg: u64, timestamp: u64) {
        let mut fat = vec![0u8; 512];
        LittleEndian::write_u64(&mut fat[0..8], ZBT_HEADER);
        let fat_bp = self.put_block(&fat);

        let mut array = vec![0u8; 4 * DNODE_SIZE];
        let objdir = make_dnode(DMU_OT_OBJECT_DIRECTORY, 1, 0, Some(fat_bp), 0, &[]);
        array[DNODE_SIZE..2 * DNODE_SIZE].copy_from_slice(&objdir);
        let array_bp = self.put_block(&array);

        let meta = make_dnode(DMU_OT_DNODE, 4, 0, Some(array_bp), 0, &[]);
        let objset_bp = self.put_block(&meta);
        self.write_uberblock(txg, timestamp, &objset_bp);
    }

    /// Plants an orphaned plain-file node: an intact data block plus a
    /// literal-LZJB-encoded dnode in unreferenced space, exactly what a
    /// delete-without-overwrite leaves behind.
    pub fn plant_deleted_file(&mut self, contents: &[u8], atime: u64, mtime: u64) {
        let padded = contents.len().div_ceil(512).max(1) * 512;
        let mut block = contents.to_vec();
        block.resize(padded, 0);
        let data_bp = self.put_block(&block);

        let bonus = make_znode_bonus(atime, mtime, contents.len() as u64);
        let dnode = make_dnode(
            DMU_OT_PLAIN_FILE,
            (padded / 512) as u16,
            0,
            Some(data_bp),
            DMU_OT_ZNODE,
            &bonus,
        );
        self.place_raw(&lzjb_literal(&dnode));
    }

    /// Stamps the vdev description and superblock array into all four label
    /// positions and returns the finished image.
    pub fn finish(mut self) -> Vec<u8> {
        let nvlist = self.encode_vdev_nvlist();
        let size = self.data.len();
        let positions = [0, LABEL_SIZE, size - 2 * LABEL_SIZE, size - LABEL_SIZE];
        for base in positions {
            self.data[base + 16 * 1024..base + 16 * 1024 + nvlist.len()].copy_from_slice(&nvlist);
            self.data[base + LABEL_SIZE / 2..base + LABEL_SIZE].copy_from_slice(&self.ub_array);
        }
        self.data
    }

    fn write_uberblock(&mut self, txg: u64, timestamp: u64, root_bp: &[u8; 128]) {
        let slot = (txg as usize) % 128;
        let start = slot * UBERBLOCK_SIZE;
        let ub = &mut self.ub_array[start..start + UBERBLOCK_SIZE];
        LittleEndian::write_u64(&mut ub[0..8], UBERBLOCK_MAGIC);
        LittleEndian::write_u64(&mut ub[8..16], 14); // version
        LittleEndian::write_u64(&mut ub[16..24], txg);
        LittleEndian::write_u64(&mut ub[24..32], self.pool_guid);
        LittleEndian::write_u64(&mut ub[32..40], timestamp);
        ub[40..168].copy_from_slice(root_bp);
    }

    /// Builds the filesystem object set for one state and returns the block
    /// pointer to it. Object ids: 1 master node, 2 root directory, then
    /// directories and files in path order.
    fn build_fs_objset(&mut self, files: &[FileSpec]) -> [u8; 128] {
        // Assign ids: directories first come first via path walking.
        let mut dir_ids: BTreeMap<String, u64> = BTreeMap::new();
        dir_ids.insert(String::new(), 2); // root
        let mut next_id = 3u64;
        let mut dir_entries: BTreeMap<u64, Vec<(String, u64)>> = BTreeMap::new();
        dir_entries.insert(2, Vec::new());
        let mut file_ids = Vec::new();

        for spec in files {
            let mut parent = String::new();
            let components: Vec<&str> = spec.path.split('/').collect();
            for dir in &components[..components.len() - 1] {
                let full = if parent.is_empty() {
                    (*dir).to_string()
                } else {
                    format!("{parent}/{dir}")
                };
                if !dir_ids.contains_key(&full) {
                    let id = next_id;
                    next_id += 1;
                    dir_ids.insert(full.clone(), id);
                    dir_entries.insert(id, Vec::new());
                    let parent_id = dir_ids[&parent];
                    dir_entries
                        .get_mut(&parent_id)
                        .unwrap()
                        .push(((*dir).to_string(), id | (4u64 << 60)));
                }
                parent = full;
            }

            let id = next_id;
            next_id += 1;
            file_ids.push((id, spec));
            let parent_id = dir_ids[&parent];
            let leaf = components.last().unwrap();
            dir_entries
                .get_mut(&parent_id)
                .unwrap()
                .push(((*leaf).to_string(), id | (8u64 << 60)));
        }
        assert!(next_id <= 32, "dnode array holds at most 32 objects");

        let mut array = vec![0u8; 32 * DNODE_SIZE];
        let set_slot = |array: &mut Vec<u8>, id: u64, dnode: [u8; DNODE_SIZE]| {
            let at = id as usize * DNODE_SIZE;
            array[at..at + DNODE_SIZE].copy_from_slice(&dnode);
        };

        // Files: one data block each.
        for (id, spec) in &file_ids {
            let padded = spec.contents.len().div_ceil(512).max(1) * 512;
            let mut block = spec.contents.clone();
            block.resize(padded, 0);
            let data_bp = self.put_block(&block);
            let bonus = make_znode_bonus(spec.atime, spec.mtime, spec.contents.len() as u64);
            let dnode = make_dnode(
                DMU_OT_PLAIN_FILE,
                (padded / 512) as u16,
                0,
                Some(data_bp),
                DMU_OT_ZNODE,
                &bonus,
            );
            set_slot(&mut array, *id, dnode);
        }

        // Directories: a micro ZAP block each.
        for id in dir_ids.values() {
            let entries = &dir_entries[id];
            let refs: Vec<(&str, u64)> = entries.iter().map(|(n, v)| (n.as_str(), *v)).collect();
            let zap = make_mzap(&refs);
            let zap_sectors = (zap.len().div_ceil(512)) as u16;
            let zap_bp = self.put_block(&zap);
            let bonus = make_znode_bonus(1, 1, entries.len() as u64);
            let dnode = make_dnode(
                DMU_OT_DIRECTORY,
                zap_sectors,
                0,
                Some(zap_bp),
                DMU_OT_ZNODE,
                &bonus,
            );
            set_slot(&mut array, *id, dnode);
        }

        // Master node.
        let master_bp = {
            let zap = make_mzap(&[("ROOT", 2)]);
            self.put_block(&zap)
        };
        let master = make_dnode(DMU_OT_MASTER_NODE, 1, 0, Some(master_bp), 0, &[]);
        set_slot(&mut array, 1, master);

        let array_bp = self.put_block(&array);
        let meta = make_dnode(DMU_OT_DNODE, 32, 0, Some(array_bp), 0, &[]);
        self.put_block(&meta)
    }

    /// Builds the meta object set: object directory, dataset directory, and
    /// dataset whose bonus points at the filesystem object set.
    fn build_mos(&mut self, fs_bp: Option<[u8; 128]>) -> [u8; 128] {
        let objdir_bp = {
            let zap = make_mzap(&[("root_dataset", 2)]);
            self.put_block(&zap)
        };

        let mut array = vec![0u8; 4 * DNODE_SIZE];

        let objdir = make_dnode(DMU_OT_OBJECT_DIRECTORY, 1, 0, Some(objdir_bp), 0, &[]);
        array[DNODE_SIZE..2 * DNODE_SIZE].copy_from_slice(&objdir);

        let mut dir_bonus = vec![0u8; 256];
        LittleEndian::write_u64(&mut dir_bonus[8..16], 3); // head dataset object
        let dsl_dir = make_dnode(DMU_OT_DSL_DIR, 1, 0, None, DMU_OT_DSL_DIR, &dir_bonus);
        array[2 * DNODE_SIZE..3 * DNODE_SIZE].copy_from_slice(&dsl_dir);

        let mut ds_bonus = vec![0u8; 320];
        if let Some(bp) = fs_bp {
            ds_bonus[128..256].copy_from_slice(&bp);
        }
        let dataset = make_dnode(DMU_OT_DSL_DATASET, 1, 0, None, DMU_OT_DSL_DATASET, &ds_bonus);
        array[3 * DNODE_SIZE..4 * DNODE_SIZE].copy_from_slice(&dataset);

        let array_bp = self.put_block(&array);
        let meta = make_dnode(DMU_OT_DNODE, 4, 0, Some(array_bp), 0, &[]);
        self.put_block(&meta)
    }

    fn encode_vdev_nvlist(&self) -> Vec<u8> {
        let tree = xdr_list_body(&[
            xdr_pair_string("type", "file"),
            xdr_pair_u64("id", 0),
            xdr_pair_u64("guid", self.pool_guid),
            xdr_pair_string("path", "/dev/fixture"),
            xdr_pair_u64("asize", self.data.len() as u64),
        ]);
        let mut out = vec![1u8, 1, 0, 0];
        out.extend_from_slice(&xdr_list_body(&[
            xdr_pair_u64("version", 14),
            xdr_pair_string("name", "tank"),
            xdr_pair_u64("pool_guid", self.pool_guid),
            xdr_pair_u64("txg", 1),
            xdr_pair_nvlist("vdev_tree", &tree),
        ]));
        out
    }
}

/// Writes the finished image to a temporary file.
pub fn write_image(image: Vec<u8>) -> NamedTempFile {
    let mut temp = NamedTempFile::new().unwrap();
    temp.write_all(&image).unwrap();
    temp.flush().unwrap();
    temp
}

/// Literal-only LZJB encoding: a zero copy-map byte before every eight
/// literals. Expands by 9/8 but decodes to the input exactly.
pub fn lzjb_literal(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in data.chunks(8) {
        out.push(0u8);
        out.extend_from_slice(chunk);
    }
    out
}

fn raw_blkptr(phys_offset: u64, padded_len: usize) -> [u8; 128] {
    let sectors = (padded_len / 512) as u64;
    let mut bp = [0u8; 128];
    LittleEndian::write_u64(&mut bp[0..8], sectors); // asize
    LittleEndian::write_u64(&mut bp[8..16], (phys_offset - DATA_START) >> 9);
    let prop =
        (sectors - 1) | ((sectors - 1) << 16) | (u64::from(COMPRESS_OFF) << 32) | (7u64 << 40);
    LittleEndian::write_u64(&mut bp[48..56], prop);
    LittleEndian::write_u64(&mut bp[80..88], 1); // birth txg
    LittleEndian::write_u64(&mut bp[88..96], 1); // fill
    bp
}

fn make_dnode(
    object_type: u8,
    datablkszsec: u16,
    maxblkid: u64,
    blkptr: Option<[u8; 128]>,
    bonus_type: u8,
    bonus: &[u8],
) -> [u8; DNODE_SIZE] {
    assert!(bonus.len() <= 320);
    let mut dn = [0u8; DNODE_SIZE];
    dn[0] = object_type;
    dn[1] = 14; // indirect block shift
    dn[2] = 1; // levels
    dn[3] = 1; // block pointers
    dn[4] = bonus_type;
    LittleEndian::write_u16(&mut dn[8..10], datablkszsec);
    LittleEndian::write_u16(&mut dn[10..12], bonus.len() as u16);
    LittleEndian::write_u64(&mut dn[16..24], maxblkid);
    LittleEndian::write_u64(&mut dn[24..32], 1); // sectors used
    if let Some(bp) = blkptr {
        dn[64..192].copy_from_slice(&bp);
    }
    dn[192..192 + bonus.len()].copy_from_slice(bonus);
    dn
}

fn make_mzap(entries: &[(&str, u64)]) -> Vec<u8> {
    let mut zap = vec![0u8; 64 + entries.len() * 64];
    LittleEndian::write_u64(&mut zap[0..8], ZBT_MICRO);
    for (i, (name, value)) in entries.iter().enumerate() {
        let start = 64 + i * 64;
        assert!(name.len() <= 49);
        LittleEndian::write_u64(&mut zap[start..start + 8], *value);
        zap[start + 14..start + 14 + name.len()].copy_from_slice(name.as_bytes());
    }
    zap
}

fn make_znode_bonus(atime: u64, mtime: u64, size: u64) -> Vec<u8> {
    let mut bonus = vec![0u8; 264];
    LittleEndian::write_u64(&mut bonus[0..8], atime);
    LittleEndian::write_u64(&mut bonus[16..24], mtime);
    LittleEndian::write_u64(&mut bonus[32..40], mtime); // ctime
    LittleEndian::write_u64(&mut bonus[48..56], mtime); // crtime
    LittleEndian::write_u64(&mut bonus[64..72], 4); // generation
    LittleEndian::write_u64(&mut bonus[72..80], 0o100644);
    LittleEndian::write_u64(&mut bonus[80..88], size);
    LittleEndian::write_u64(&mut bonus[96..104], 1); // links
    bonus
}

fn xdr_push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn xdr_push_string(out: &mut Vec<u8>, s: &str) {
    xdr_push_u32(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
    out.extend(std::iter::repeat_n(0u8, (4 - s.len() % 4) % 4));
}

fn xdr_pair(name: &str, typ: u32, value: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    xdr_push_string(&mut body, name);
    xdr_push_u32(&mut body, typ);
    xdr_push_u32(&mut body, 1); // element count
    body.extend_from_slice(value);

    let mut out = Vec::new();
    xdr_push_u32(&mut out, (body.len() + 8) as u32);
    xdr_push_u32(&mut out, (body.len() + 8) as u32);
    out.extend_from_slice(&body);
    out
}

fn xdr_pair_u64(name: &str, v: u64) -> Vec<u8> {
    xdr_pair(name, 8, &v.to_be_bytes())
}

fn xdr_pair_string(name: &str, s: &str) -> Vec<u8> {
    let mut value = Vec::new();
    xdr_push_string(&mut value, s);
    xdr_pair(name, 9, &value)
}

fn xdr_pair_nvlist(name: &str, body: &[u8]) -> Vec<u8> {
    xdr_pair(name, 19, body)
}

fn xdr_list_body(pairs: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    xdr_push_u32(&mut out, 0); // version
    xdr_push_u32(&mut out, 1); // flags
    for pair in pairs {
        out.extend_from_slice(pair);
    }
    out.extend_from_slice(&0u64.to_be_bytes()); // terminator
    out
}
