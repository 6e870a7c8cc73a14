/// Reference: "XFS Algorithms & Data Structures", AG Inode Management (AGI).
use std::convert::TryInto;

/// AGI magic: "XAGI"
const XFS_AGI_MAGIC: u32 = 0x58414749;

const AGI_ROOT_OFFSET: usize = 20;

/// The portion of the AG inode information sector needed to find the
/// inode B+tree. It lives in the third sector of every allocation group.
#[derive(Debug)]
pub struct AgInodeInfo {
    pub agi_magicnum: u32,
    /// Root block of the inode B+tree, relative to the allocation group.
    pub agi_root: u32,
}

impl AgInodeInfo {
    pub fn from_bytes(data: &[u8]) -> Result<Self, String> {
        if data.len() < AGI_ROOT_OFFSET + 4 {
            return Err("Not enough bytes to parse the AGI record".to_string());
        }
        Ok(Self {
            agi_magicnum: u32::from_be_bytes(data[0..4].try_into().unwrap()),
            agi_root: u32::from_be_bytes(
                data[AGI_ROOT_OFFSET..AGI_ROOT_OFFSET + 4].try_into().unwrap(),
            ),
        })
    }

    /// The root pointer is used either way; a mismatched magic is only
    /// worth a diagnostic.
    pub fn has_valid_magic(&self) -> bool {
        self.agi_magicnum == XFS_AGI_MAGIC
    }
}
