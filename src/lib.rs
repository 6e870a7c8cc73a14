use std::collections::HashSet;
use std::error::Error;
use std::io::{ErrorKind, Read, Seek, SeekFrom};

pub mod agi;
pub mod copier;
pub mod extent;
pub mod inobt;
pub mod inode;
pub mod recover;
pub mod sniff;
pub mod superblock;

use agi::AgInodeInfo;
use inobt::{InobtBlockHeader, XFS_INODES_PER_CHUNK};
use inode::{slot_inode_number, DeletedInode, XFS_DINODE_MAGIC};
use log::{debug, warn};
use superblock::{Superblock, XFS_MIN_SECTOR_SIZE};

/// The AGI record lives in the third sector of its allocation group.
const AGI_SECTOR: u64 = 2;

/// Struct representing an XFS filesystem image.
pub struct XfsFS<T: Read + Seek> {
    pub superblock: Superblock,
    body: T,
    /// Byte address where the filesystem starts inside the evidence.
    start_byte_address: u64,
    inodes_checked: u64,
}

impl<T: Read + Seek> XfsFS<T> {
    /// Create a new XfsFS instance given any type that implements `Read`
    /// and `Seek`.
    pub fn new(mut body: T, start_byte_address: u64) -> Result<Self, String> {
        body.seek(SeekFrom::Start(start_byte_address))
            .map_err(|e| e.to_string())?;
        let mut sb_buf = vec![0u8; XFS_MIN_SECTOR_SIZE];
        body.read_exact(&mut sb_buf).map_err(|e| e.to_string())?;
        let superblock = Superblock::from_bytes(&sb_buf)?;

        Ok(XfsFS {
            superblock,
            body,
            start_byte_address,
            inodes_checked: 0,
        })
    }

    fn read_at(&mut self, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
        self.body
            .seek(SeekFrom::Start(self.start_byte_address + offset))?;
        let mut buf = vec![0u8; size];
        self.body.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Read one filesystem block given its AG and AG-relative block number.
    fn read_ag_block(&mut self, ag: u32, block: u64) -> std::io::Result<Vec<u8>> {
        let block_size = self.superblock.block_size();
        let absolute = ag as u64 * self.superblock.ag_blocks() + block;
        self.read_at(absolute * block_size, block_size as usize)
    }

    /// Read the AG inode information record of one allocation group.
    pub fn ag_inode_info(&mut self, ag: u32) -> Result<AgInodeInfo, Box<dyn Error>> {
        let sector_size = self.superblock.sector_size();
        let base = self.superblock.ag_byte_base(ag);
        let sector = self.read_at(base + AGI_SECTOR * sector_size, sector_size as usize)?;
        Ok(AgInodeInfo::from_bytes(&sector)?)
    }

    /// Walk every allocation group and stream out the deleted inodes whose
    /// extent map qualifies for recovery.
    ///
    /// Traversal is deterministic: AG index ascending, pre-order within
    /// each inode B+tree, slot offset ascending within a cluster block.
    /// Format anomalies are skipped at the narrowest possible scope; only
    /// source I/O errors other than a truncated read are returned.
    pub fn scan_deleted_inodes(
        &mut self,
        min_ctime: u32,
        sink: &mut dyn FnMut(DeletedInode),
    ) -> Result<(), Box<dyn Error>> {
        for ag in 0..self.superblock.ag_count() {
            let info = match self.ag_inode_info(ag) {
                Ok(info) => info,
                Err(err) => {
                    warn!("AG {}: unreadable AGI record: {}", ag, err);
                    continue;
                }
            };
            if !info.has_valid_magic() {
                debug!("AG {}: AGI magic mismatch", ag);
            }
            self.walk_inode_tree(ag, info.agi_root, min_ctime, sink)?;
        }
        Ok(())
    }

    /// Convenience wrapper collecting the streamed candidates.
    pub fn collect_deleted_inodes(
        &mut self,
        min_ctime: u32,
    ) -> Result<Vec<DeletedInode>, Box<dyn Error>> {
        let mut found = Vec::new();
        self.scan_deleted_inodes(min_ctime, &mut |inode| found.push(inode))?;
        Ok(found)
    }

    /// Walk the inode B+tree of one AG, handing every inode cluster block
    /// to the slot scanner. An explicit worklist stands in for recursion,
    /// and a visited set bounds the walk on corrupt trees.
    fn walk_inode_tree(
        &mut self,
        ag: u32,
        root: u32,
        min_ctime: u32,
        sink: &mut dyn FnMut(DeletedInode),
    ) -> Result<(), Box<dyn Error>> {
        let ag_blocks = self.superblock.ag_blocks();
        let mut stack = vec![root];
        let mut visited: HashSet<u32> = HashSet::new();

        while let Some(block) = stack.pop() {
            if !visited.insert(block) {
                continue;
            }
            if block as u64 >= ag_blocks {
                debug!("AG {}: btree pointer {} outside the AG", ag, block);
                continue;
            }
            let data = match self.read_ag_block(ag, block as u64) {
                Ok(data) => data,
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                    debug!("AG {}: truncated btree block {}", ag, block);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let header = match InobtBlockHeader::from_bytes(&data) {
                Some(header) => header,
                None => {
                    debug!("AG {}: block {} is not an inode btree block", ag, block);
                    continue;
                }
            };
            if header.is_leaf() {
                for rec in header.leaf_records(&data) {
                    self.scan_inode_chunk(ag, rec.ir_startino, min_ctime, sink)?;
                }
            } else {
                // Reversed so the leftmost child is walked first.
                for child in header.child_pointers(&data).into_iter().rev() {
                    stack.push(child);
                }
            }
        }
        Ok(())
    }

    /// Visit the cluster blocks of one 64-inode chunk.
    fn scan_inode_chunk(
        &mut self,
        ag: u32,
        agi_start: u32,
        min_ctime: u32,
        sink: &mut dyn FnMut(DeletedInode),
    ) -> Result<(), Box<dyn Error>> {
        let inopblock = self.superblock.inodes_per_block() as u64;
        let mut index = 0u64;
        while index < XFS_INODES_PER_CHUNK as u64 {
            let cluster = (agi_start as u64 + index) / inopblock;
            self.scan_cluster_block(ag, cluster, min_ctime, sink)?;
            index += inopblock;
        }
        Ok(())
    }

    /// Scan the fixed-size inode slots of one cluster block.
    fn scan_cluster_block(
        &mut self,
        ag: u32,
        block: u64,
        min_ctime: u32,
        sink: &mut dyn FnMut(DeletedInode),
    ) -> Result<(), Box<dyn Error>> {
        if block >= self.superblock.ag_blocks() {
            debug!("AG {}: inode cluster {} outside the AG", ag, block);
            return Ok(());
        }
        let data = match self.read_ag_block(ag, block) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                debug!("AG {}: truncated inode cluster {}", ag, block);
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };

        let inode_size = self.superblock.inode_size();
        let total = self.superblock.inode_count();
        let mut offset = 0usize;
        while offset + inode_size <= data.len() {
            let slot = &data[offset..offset + inode_size];
            offset += inode_size;
            if slot[0..2] != XFS_DINODE_MAGIC {
                continue;
            }
            self.inodes_checked += 1;
            let percent = if total > 0 {
                self.inodes_checked * 100 / total
            } else {
                0
            };
            eprint!(
                "\rchecking inode {} ({}%) ",
                slot_inode_number(slot),
                percent
            );
            if let Some(found) = DeletedInode::from_slot(slot, &self.superblock, min_ctime) {
                sink(found);
            }
        }
        Ok(())
    }
}
