use std::fs::OpenOptions;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Copies runs of filesystem blocks from the source image into output
/// files. Implementations write at block granularity, byte-exact, and
/// never truncate the destination.
pub trait BlockCopier {
    fn copy_blocks(
        &mut self,
        dst: &Path,
        block_size: u64,
        src_block: u64,
        dst_block: u64,
        count: u64,
    ) -> io::Result<()>;
}

/// Direct pread/pwrite-style copier over any readable, seekable evidence
/// source. Replaces the external byte-copy utility with in-process I/O.
pub struct DirectBlockCopier<R: Read + Seek> {
    src: R,
    /// Byte address where the filesystem starts inside the evidence.
    start_byte_address: u64,
}

impl<R: Read + Seek> DirectBlockCopier<R> {
    pub fn new(src: R, start_byte_address: u64) -> Self {
        Self {
            src,
            start_byte_address,
        }
    }
}

impl<R: Read + Seek> BlockCopier for DirectBlockCopier<R> {
    fn copy_blocks(
        &mut self,
        dst: &Path,
        block_size: u64,
        src_block: u64,
        dst_block: u64,
        count: u64,
    ) -> io::Result<()> {
        let mut out = OpenOptions::new().write(true).create(true).open(dst)?;
        self.src.seek(SeekFrom::Start(
            self.start_byte_address + src_block * block_size,
        ))?;
        out.seek(SeekFrom::Start(dst_block * block_size))?;
        let mut block = vec![0u8; block_size as usize];
        for _ in 0..count {
            self.src.read_exact(&mut block)?;
            out.write_all(&block)?;
        }
        Ok(())
    }
}
