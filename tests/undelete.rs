//! End-to-end recovery scenarios over synthetic XFS images built
//! byte-for-byte in memory.

use exhume_xfs::copier::DirectBlockCopier;
use exhume_xfs::recover::{format_ctime, Carver};
use exhume_xfs::sniff::MagicClassifier;
use exhume_xfs::XfsFS;
use std::collections::HashSet;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const BLOCK_SIZE: usize = 512;
const SECTOR_SIZE: usize = 512;
const INODE_SIZE: usize = 256;
const INOPBLOCK: u16 = 2;
const AG_BLOCKS: u32 = 64;
const AG_COUNT: u32 = 4;
const DATA_BLOCKS: u64 = 256;
const AGBLKLOG: u8 = 6;
const INODE_COUNT: u64 = 64;

const CTIME: u32 = 1_600_000_000;

struct ImageBuilder {
    data: Vec<u8>,
}

impl ImageBuilder {
    /// A four-AG image whose AGI records all point to an empty old-format
    /// leaf in block 3.
    fn new() -> Self {
        let mut builder = ImageBuilder {
            data: vec![0u8; DATA_BLOCKS as usize * BLOCK_SIZE],
        };
        builder.write_superblock();
        for ag in 0..AG_COUNT {
            builder.write_agi(ag, 3);
            builder.write_leaf(ag, 3, false, &[]);
        }
        builder
    }

    fn write_superblock(&mut self) {
        let sb = &mut self.data[0..SECTOR_SIZE];
        sb[0x00..0x04].copy_from_slice(b"XFSB");
        sb[0x04..0x08].copy_from_slice(&(BLOCK_SIZE as u32).to_be_bytes());
        sb[0x08..0x10].copy_from_slice(&DATA_BLOCKS.to_be_bytes());
        sb[0x54..0x58].copy_from_slice(&AG_BLOCKS.to_be_bytes());
        sb[0x58..0x5C].copy_from_slice(&AG_COUNT.to_be_bytes());
        sb[0x66..0x68].copy_from_slice(&(SECTOR_SIZE as u16).to_be_bytes());
        sb[0x68..0x6A].copy_from_slice(&(INODE_SIZE as u16).to_be_bytes());
        sb[0x6A..0x6C].copy_from_slice(&INOPBLOCK.to_be_bytes());
        sb[0x7C] = AGBLKLOG;
        sb[0x80..0x88].copy_from_slice(&INODE_COUNT.to_be_bytes());
    }

    fn ag_byte_base(ag: u32) -> usize {
        ag as usize * AG_BLOCKS as usize * BLOCK_SIZE
    }

    fn block_offset(ag: u32, block: u32) -> usize {
        Self::ag_byte_base(ag) + block as usize * BLOCK_SIZE
    }

    fn write_agi(&mut self, ag: u32, root: u32) {
        let at = Self::ag_byte_base(ag) + 2 * SECTOR_SIZE;
        self.data[at..at + 4].copy_from_slice(b"XAGI");
        self.data[at + 20..at + 24].copy_from_slice(&root.to_be_bytes());
    }

    fn write_btree_header(&mut self, ag: u32, block: u32, crc: bool, level: u16, numrecs: u16) {
        let at = Self::block_offset(ag, block);
        let magic: &[u8; 4] = if crc { b"IAB3" } else { b"IABT" };
        self.data[at..at + 4].copy_from_slice(magic);
        self.data[at + 4..at + 6].copy_from_slice(&level.to_be_bytes());
        self.data[at + 6..at + 8].copy_from_slice(&numrecs.to_be_bytes());
    }

    fn write_leaf(&mut self, ag: u32, block: u32, crc: bool, startinos: &[u32]) {
        self.write_btree_header(ag, block, crc, 0, startinos.len() as u16);
        let header_size = if crc { 56 } else { 16 };
        let base = Self::block_offset(ag, block) + header_size;
        for (i, startino) in startinos.iter().enumerate() {
            let at = base + i * 16;
            self.data[at..at + 4].copy_from_slice(&startino.to_be_bytes());
        }
    }

    fn write_node(&mut self, ag: u32, block: u32, crc: bool, children: &[u32]) {
        self.write_btree_header(ag, block, crc, 1, children.len() as u16);
        let header_size = if crc { 56 } else { 16 };
        let base = Self::block_offset(ag, block) + (BLOCK_SIZE + header_size) / 2;
        for (i, child) in children.iter().enumerate() {
            let at = base + i * 4;
            self.data[at..at + 4].copy_from_slice(&child.to_be_bytes());
        }
    }

    fn write_deleted_inode(
        &mut self,
        ag: u32,
        cluster_block: u32,
        slot: usize,
        ino: u64,
        ctime: u32,
        extents: &[[u8; 16]],
    ) {
        let at = Self::block_offset(ag, cluster_block) + slot * INODE_SIZE;
        let slot_bytes = &mut self.data[at..at + INODE_SIZE];
        slot_bytes[0..8].copy_from_slice(&[0x49, 0x4E, 0x00, 0x00, 0x03, 0x02, 0x00, 0x00]);
        slot_bytes[48..52].copy_from_slice(&ctime.to_be_bytes());
        slot_bytes[152..160].copy_from_slice(&ino.to_be_bytes());
        for (i, rec) in extents.iter().enumerate() {
            let rec_at = 176 + i * 16;
            slot_bytes[rec_at..rec_at + 16].copy_from_slice(rec);
        }
    }

    fn write_data_block(&mut self, absolute_block: u64, content: &[u8]) {
        let at = absolute_block as usize * BLOCK_SIZE;
        self.data[at..at + content.len()].copy_from_slice(content);
    }

    fn build(self) -> Vec<u8> {
        self.data
    }
}

fn pack_extent(unwritten: bool, startoff: u64, agno: u64, agblock: u64, count: u64) -> [u8; 16] {
    let raw: u128 = ((unwritten as u128) << 127)
        | ((startoff as u128) << 73)
        | ((agno as u128) << (21 + AGBLKLOG as u32))
        | ((agblock as u128) << 21)
        | count as u128;
    raw.to_be_bytes()
}

fn extension_set(extensions: &[&str]) -> HashSet<String> {
    extensions.iter().map(|ext| ext.to_string()).collect()
}

fn run_recovery(
    image: &[u8],
    out_dir: &Path,
    ignore: &[&str],
    recover: &[&str],
    min_ctime: u32,
) -> Vec<PathBuf> {
    let mut filesystem = XfsFS::new(Cursor::new(image.to_vec()), 0).unwrap();
    let copier = DirectBlockCopier::new(Cursor::new(image.to_vec()), 0);
    let mut carver = Carver::new(
        out_dir.to_path_buf(),
        extension_set(ignore),
        extension_set(recover),
        copier,
        MagicClassifier,
    )
    .unwrap();
    let block_size = filesystem.superblock.block_size();
    let mut recovered = Vec::new();
    filesystem
        .scan_deleted_inodes(min_ctime, &mut |inode| {
            if let Some(path) = carver.carve(&inode, block_size) {
                recovered.push(path);
            }
        })
        .unwrap();
    recovered
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// A single deleted text file in AG 0: the baseline image most scenarios
/// start from.
fn single_file_image() -> ImageBuilder {
    let mut builder = ImageBuilder::new();
    builder.write_leaf(0, 3, false, &[16]);
    builder.write_deleted_inode(0, 8, 0, 131, CTIME, &[pack_extent(false, 0, 0, 5, 1)]);
    builder.write_data_block(5, b"hello\n");
    builder
}

#[test]
fn empty_inode_trees_recover_nothing() {
    let image = ImageBuilder::new().build();
    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert!(recovered.is_empty());
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn recovers_a_single_text_file() {
    let image = single_file_image().build();
    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);

    assert_eq!(recovered.len(), 1);
    let expected_name = format!("{}_131.txt", format_ctime(CTIME));
    assert_eq!(dir_entries(out.path()), vec![expected_name]);

    let mut expected = b"hello\n".to_vec();
    expected.resize(BLOCK_SIZE, 0);
    assert_eq!(fs::read(&recovered[0]).unwrap(), expected);
}

#[test]
fn preallocated_extent_is_not_recovered() {
    let mut builder = ImageBuilder::new();
    builder.write_leaf(0, 3, false, &[16]);
    builder.write_deleted_inode(0, 8, 0, 131, CTIME, &[pack_extent(true, 0, 0, 5, 1)]);
    builder.write_data_block(5, b"hello\n");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert!(recovered.is_empty());
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn ignore_list_wins_over_recover_list() {
    let mut builder = ImageBuilder::new();
    builder.write_leaf(0, 3, false, &[16]);
    builder.write_deleted_inode(0, 8, 0, 131, CTIME, &[pack_extent(false, 0, 0, 5, 1)]);
    // Binary noise classifies as application/octet-stream -> "bin".
    builder.write_data_block(5, &[0x00, 0xA5, 0x5A, 0x01, 0xFE, 0x10]);
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &["bin", "txt"], 0);
    assert!(recovered.is_empty());
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn recover_list_drops_unlisted_extensions() {
    let image = single_file_image().build();
    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &[], &["jpg"], 0);
    assert!(recovered.is_empty());
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn out_of_image_extent_is_dropped_but_the_file_survives() {
    let mut builder = ImageBuilder::new();
    builder.write_leaf(0, 3, false, &[16]);
    builder.write_deleted_inode(
        0,
        8,
        0,
        131,
        CTIME,
        &[
            pack_extent(false, 0, 0, 5, 1),
            // 3 * 64 + 63 + 1 == 256 == sb_dblocks: one block too far.
            pack_extent(false, 1, 3, 63, 1),
        ],
    );
    builder.write_data_block(5, b"hello\n");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert_eq!(recovered.len(), 1);
    // Only the offset-zero extent was copied.
    assert_eq!(fs::read(&recovered[0]).unwrap().len(), BLOCK_SIZE);
}

#[test]
fn walks_both_btree_formats_in_ag_order() {
    let mut builder = ImageBuilder::new();
    // AG 0: old-format node -> leaf.
    builder.write_node(0, 3, false, &[4]);
    builder.write_leaf(0, 4, false, &[16]);
    builder.write_deleted_inode(0, 8, 0, 131, CTIME, &[pack_extent(false, 0, 0, 5, 1)]);
    builder.write_data_block(5, b"hello\n");
    // AG 1: CRC-format node -> leaf.
    builder.write_node(1, 3, true, &[4]);
    builder.write_leaf(1, 4, true, &[16]);
    builder.write_deleted_inode(1, 8, 0, 200, CTIME, &[pack_extent(false, 0, 1, 5, 1)]);
    builder.write_data_block(64 + 5, b"world\n");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert_eq!(recovered.len(), 2);
    assert!(recovered[0].to_string_lossy().contains("_131"));
    assert!(recovered[1].to_string_lossy().contains("_200"));

    let mut hello = b"hello\n".to_vec();
    hello.resize(BLOCK_SIZE, 0);
    let mut world = b"world\n".to_vec();
    world.resize(BLOCK_SIZE, 0);
    assert_eq!(fs::read(&recovered[0]).unwrap(), hello);
    assert_eq!(fs::read(&recovered[1]).unwrap(), world);
}

#[test]
fn multi_extent_file_lands_at_its_logical_offsets() {
    let mut builder = ImageBuilder::new();
    builder.write_leaf(0, 3, false, &[16]);
    builder.write_deleted_inode(
        0,
        8,
        0,
        131,
        CTIME,
        &[
            pack_extent(false, 0, 0, 5, 1),
            pack_extent(false, 2, 0, 7, 2),
        ],
    );
    builder.write_data_block(5, b"first block\n");
    builder.write_data_block(7, b"third block\n");
    builder.write_data_block(8, b"fourth block\n");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert_eq!(recovered.len(), 1);

    let content = fs::read(&recovered[0]).unwrap();
    assert_eq!(content.len(), 4 * BLOCK_SIZE);
    assert!(content[0..BLOCK_SIZE].starts_with(b"first block\n"));
    // The hole at logical block 1 stays zeroed.
    assert_eq!(&content[BLOCK_SIZE..2 * BLOCK_SIZE], &vec![0u8; BLOCK_SIZE][..]);
    assert!(content[2 * BLOCK_SIZE..3 * BLOCK_SIZE].starts_with(b"third block\n"));
    assert!(content[3 * BLOCK_SIZE..4 * BLOCK_SIZE].starts_with(b"fourth block\n"));
}

#[test]
fn min_ctime_excludes_older_deletions() {
    let image = single_file_image().build();
    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], CTIME + 1);
    assert!(recovered.is_empty());

    let out2 = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out2.path(), &["bin"], &[], CTIME);
    assert_eq!(recovered.len(), 1);
}

#[test]
fn reruns_are_idempotent() {
    let image = single_file_image().build();
    let out = tempfile::tempdir().unwrap();

    let first = run_recovery(&image, out.path(), &["bin"], &[], 0);
    let names_first = dir_entries(out.path());
    let content_first = fs::read(&first[0]).unwrap();

    let second = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert_eq!(first, second);
    assert_eq!(dir_entries(out.path()), names_first);
    assert_eq!(fs::read(&second[0]).unwrap(), content_first);
}

#[test]
fn unknown_tree_magic_is_skipped_silently() {
    let mut builder = ImageBuilder::new();
    // The AGI points into a block that is not an inode btree block.
    let at = ImageBuilder::block_offset(2, 3);
    builder.data[at..at + 4].copy_from_slice(b"JUNK");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert!(recovered.is_empty());
}

#[test]
fn cyclic_tree_pointers_terminate() {
    let mut builder = ImageBuilder::new();
    // A node in AG 0 pointing at itself and at a valid leaf.
    builder.write_node(0, 3, false, &[3, 4]);
    builder.write_leaf(0, 4, false, &[16]);
    builder.write_deleted_inode(0, 8, 0, 131, CTIME, &[pack_extent(false, 0, 0, 5, 1)]);
    builder.write_data_block(5, b"hello\n");
    let image = builder.build();

    let out = tempfile::tempdir().unwrap();
    let recovered = run_recovery(&image, out.path(), &["bin"], &[], 0);
    assert_eq!(recovered.len(), 1);
}

#[test]
fn partition_offset_shifts_every_structure() {
    let image = single_file_image().build();
    let mut shifted = vec![0xEEu8; 1000];
    shifted.extend_from_slice(&image);

    let mut filesystem = XfsFS::new(Cursor::new(shifted.clone()), 1000).unwrap();
    let copier = DirectBlockCopier::new(Cursor::new(shifted), 1000);
    let out = tempfile::tempdir().unwrap();
    let mut carver = Carver::new(
        out.path().to_path_buf(),
        extension_set(&["bin"]),
        HashSet::new(),
        copier,
        MagicClassifier,
    )
    .unwrap();
    let block_size = filesystem.superblock.block_size();
    let mut recovered = Vec::new();
    filesystem
        .scan_deleted_inodes(0, &mut |inode| {
            if let Some(path) = carver.carve(&inode, block_size) {
                recovered.push(path);
            }
        })
        .unwrap();

    assert_eq!(recovered.len(), 1);
    let mut expected = b"hello\n".to_vec();
    expected.resize(BLOCK_SIZE, 0);
    assert_eq!(fs::read(&recovered[0]).unwrap(), expected);
}

#[test]
fn listing_reports_candidates_without_writing() {
    let image = single_file_image().build();
    let mut filesystem = XfsFS::new(Cursor::new(image), 0).unwrap();
    let candidates = filesystem.collect_deleted_inodes(0).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].ino, 131);
    assert_eq!(candidates[0].ctime, CTIME);
    assert_eq!(candidates[0].extents[&0].start_block, 5);
    assert_eq!(candidates[0].block_count(), 1);
}

#[test]
fn truncated_image_skips_unreachable_clusters() {
    let image = single_file_image().build();
    // Cut the image short right after the inode btree of AG 0; the AGI
    // sectors of the later AGs are gone, and so is the cluster block.
    let truncated = image[..4 * BLOCK_SIZE].to_vec();

    let mut filesystem = XfsFS::new(Cursor::new(truncated), 0).unwrap();
    let candidates = filesystem.collect_deleted_inodes(0).unwrap();
    assert!(candidates.is_empty());
}
