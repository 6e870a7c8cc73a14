/// Reference: "XFS Algorithms & Data Structures", On-disk Inode.
use chrono::{TimeZone, Utc};
use prettytable::{Cell, Row, Table};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::TryInto;

use crate::extent::{PackedExtent, EXTENT_REC_SIZE};
use crate::superblock::Superblock;

/// First bytes of every on-disk inode: "IN".
pub const XFS_DINODE_MAGIC: [u8; 2] = [0x49, 0x4E];

/// First eight bytes of an inode slot freed by a recent deletion: the
/// magic, zeroed mode bits, version 3 and extent format. An inode in
/// this state still carries its extent array until the slot is reused.
/// This is an empirical signature for one on-disk generation of XFS;
/// other freed-inode images exist and are not matched.
pub const XFS_DINODE_DELETED_SIG: [u8; 8] = [0x49, 0x4E, 0x00, 0x00, 0x03, 0x02, 0x00, 0x00];

const DI_CTIME_OFFSET: usize = 48;
const DI_INO_OFFSET: usize = 152;
/// Start of the literal area holding the packed extent array.
const DI_EXTENT_AREA_OFFSET: usize = 176;

/// Upper bound on a logical byte offset the output tooling can address.
const MAX_LOGICAL_BYTE: u128 = i64::MAX as u128;

/// A contiguous run of data blocks belonging to a deleted file.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ExtentRun {
    /// First block of the run, absolute within the data device.
    pub start_block: u64,
    pub block_count: u64,
}

/// A deleted inode whose surviving extent map qualifies for recovery.
#[derive(Debug, Serialize)]
pub struct DeletedInode {
    pub ino: u64,
    /// Change time recorded at deletion, in epoch seconds.
    pub ctime: u32,
    pub ctime_h: String,
    /// Logical block offset within the file -> run of disk blocks.
    pub extents: BTreeMap<u64, ExtentRun>,
}

/// Reads the inode number an "IN" slot claims to be, for diagnostics.
pub fn slot_inode_number(slot: &[u8]) -> u64 {
    match slot.get(DI_INO_OFFSET..DI_INO_OFFSET + 8) {
        Some(raw) => u64::from_be_bytes(raw.try_into().unwrap()),
        None => 0,
    }
}

impl DeletedInode {
    /// Decodes a recovery candidate from one fixed-size inode slot.
    ///
    /// Returns `None` unless the slot carries the freed-inode signature,
    /// a change time at or after `min_ctime`, and an extent map with at
    /// least one usable run starting at logical offset zero. Extents
    /// that are unwritten, zero-length, out of the image, or whose
    /// logical byte offset cannot be addressed are dropped one by one;
    /// duplicated logical offsets keep the last record.
    pub fn from_slot(slot: &[u8], sb: &Superblock, min_ctime: u32) -> Option<DeletedInode> {
        if slot.get(0..8)? != XFS_DINODE_DELETED_SIG {
            return None;
        }

        let ctime = u32::from_be_bytes(
            slot.get(DI_CTIME_OFFSET..DI_CTIME_OFFSET + 4)?
                .try_into()
                .unwrap(),
        );
        if ctime < min_ctime {
            return None;
        }
        let ino = u64::from_be_bytes(
            slot.get(DI_INO_OFFSET..DI_INO_OFFSET + 8)?
                .try_into()
                .unwrap(),
        );

        let mut extents: BTreeMap<u64, ExtentRun> = BTreeMap::new();
        let mut offset = DI_EXTENT_AREA_OFFSET;
        while offset + EXTENT_REC_SIZE <= slot.len() {
            let rec = &slot[offset..offset + EXTENT_REC_SIZE];
            offset += EXTENT_REC_SIZE;
            let ext = match PackedExtent::from_bytes(rec, sb.ag_block_log()) {
                Some(ext) => ext,
                None => continue,
            };
            if ext.br_unwritten || ext.br_blockcount == 0 {
                continue;
            }
            let start_block = ext.start_block(sb.ag_blocks());
            if start_block + ext.br_blockcount >= sb.data_blocks() {
                continue;
            }
            if ext.br_startoff as u128 * sb.block_size() as u128 >= MAX_LOGICAL_BYTE {
                continue;
            }
            extents.insert(
                ext.br_startoff,
                ExtentRun {
                    start_block,
                    block_count: ext.br_blockcount,
                },
            );
        }

        if extents.is_empty() || !extents.contains_key(&0) {
            return None;
        }

        Some(DeletedInode {
            ino,
            ctime,
            ctime_h: format_ctime(ctime),
            extents,
        })
    }

    /// Total blocks covered by the surviving runs.
    pub fn block_count(&self) -> u64 {
        self.extents.values().map(|run| run.block_count).sum()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({}))
    }

    /// String representation of a candidate using prettytable
    pub fn to_string(&self) -> String {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("Inode"),
            Cell::new(&format!("{}", self.ino)),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Deleted (ctime)"),
            Cell::new(&self.ctime_h),
        ]));
        table.add_row(Row::new(vec![
            Cell::new("Blocks"),
            Cell::new(&format!("{}", self.block_count())),
        ]));
        for (logical, run) in &self.extents {
            table.add_row(Row::new(vec![
                Cell::new(&format!("Extent @{}", logical)),
                Cell::new(&format!("block {} x{}", run.start_block, run.block_count)),
            ]));
        }
        table.to_string()
    }
}

fn format_ctime(ctime: u32) -> String {
    Utc.timestamp_opt(ctime as i64, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default()
}
