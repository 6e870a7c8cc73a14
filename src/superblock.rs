/// Reference: https://righteousit.com/2018/05/21/xfs-part-one-superblock/
/// and the "XFS Algorithms & Data Structures" document, chapter 13.
use serde_json::{json, Value};
use std::convert::TryInto;

/// Magic = 'XFSB'
const XFS_SB_MAGIC: u32 = 0x58465342;

/// Every XFS sector is at least 512 bytes, so the superblock core can be
/// read with this conservative size before the real sector size is known.
pub const XFS_MIN_SECTOR_SIZE: usize = 512;

/// Widest block-within-AG field a packed extent record can carry.
const XFS_MAX_AGBLKLOG: u8 = 52;

#[derive(Debug)]
pub struct Superblock {
    pub sb_magicnum: u32,
    pub sb_blocksize: u32,
    pub sb_dblocks: u64,
    pub sb_agblocks: u32,
    pub sb_agcount: u32,
    pub sb_sectsize: u16,
    pub sb_inodesize: u16,
    pub sb_inopblock: u16,
    pub sb_agblklog: u8,
    pub sb_icount: u64,
}

impl Superblock {
    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if data.len() < XFS_MIN_SECTOR_SIZE {
            return Err("Not enough bytes to parse superblock".to_string());
        }
        let be_u16 = |offset: usize| -> u16 {
            u16::from_be_bytes(data[offset..offset + 2].try_into().unwrap())
        };
        let be_u32 = |offset: usize| -> u32 {
            u32::from_be_bytes(data[offset..offset + 4].try_into().unwrap())
        };
        let be_u64 = |offset: usize| -> u64 {
            u64::from_be_bytes(data[offset..offset + 8].try_into().unwrap())
        };

        let sb_magicnum = be_u32(0x00);
        if sb_magicnum != XFS_SB_MAGIC {
            return Err("Invalid FileSystem".to_string());
        }

        let sb = Self {
            sb_magicnum,
            sb_blocksize: be_u32(0x04),
            sb_dblocks: be_u64(0x08),
            sb_agblocks: be_u32(0x54),
            sb_agcount: be_u32(0x58),
            sb_sectsize: be_u16(0x66),
            sb_inodesize: be_u16(0x68),
            sb_inopblock: be_u16(0x6A),
            sb_agblklog: data[0x7C],
            sb_icount: be_u64(0x80),
        };
        sb.validate()?;
        Ok(sb)
    }

    fn validate(&self) -> Result<(), String> {
        if self.sb_blocksize == 0
            || self.sb_sectsize == 0
            || self.sb_inodesize == 0
            || self.sb_inopblock == 0
            || self.sb_agblocks == 0
            || self.sb_agcount == 0
            || self.sb_dblocks == 0
        {
            return Err("Superblock carries zero geometry".to_string());
        }
        if self.sb_agblklog > XFS_MAX_AGBLKLOG {
            return Err(format!(
                "sb_agblklog {} does not fit a packed extent record",
                self.sb_agblklog
            ));
        }
        Ok(())
    }

    pub fn block_size(&self) -> u64 {
        self.sb_blocksize as u64
    }

    pub fn sector_size(&self) -> u64 {
        self.sb_sectsize as u64
    }

    pub fn inode_size(&self) -> usize {
        self.sb_inodesize as usize
    }

    pub fn inodes_per_block(&self) -> usize {
        self.sb_inopblock as usize
    }

    pub fn ag_blocks(&self) -> u64 {
        self.sb_agblocks as u64
    }

    pub fn ag_count(&self) -> u32 {
        self.sb_agcount
    }

    pub fn data_blocks(&self) -> u64 {
        self.sb_dblocks
    }

    pub fn ag_block_log(&self) -> u8 {
        self.sb_agblklog
    }

    pub fn inode_count(&self) -> u64 {
        self.sb_icount
    }

    /// Byte address of an allocation group within the filesystem.
    pub fn ag_byte_base(&self, ag: u32) -> u64 {
        ag as u64 * self.ag_blocks() * self.block_size()
    }

    pub fn print_sp_info(&self) {
        println!("{:#?}", self);
    }

    pub fn to_json(&self) -> Value {
        json!({
            "magic": format!("0x{:08x}", self.sb_magicnum),
            "block_size": self.sb_blocksize,
            "data_blocks": self.sb_dblocks,
            "ag_blocks": self.sb_agblocks,
            "ag_count": self.sb_agcount,
            "sector_size": self.sb_sectsize,
            "inode_size": self.sb_inodesize,
            "inodes_per_block": self.sb_inopblock,
            "ag_block_log": self.sb_agblklog,
            "inode_count": self.sb_icount,
        })
    }
}
