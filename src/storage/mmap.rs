//! # Memory-Mapped Block Store
//!
//! `MmapStore` maps a fixed-size file of `block_count` blocks directly into
//! the process address space. Reads and writes are plain memory copies into
//! and out of the mapping; the OS page cache does the rest.
//!
//! ## File Format
//!
//! The file is simply concatenated blocks:
//!
//! ```text
//! Offset 0:              block 0
//! Offset block_size:     block 1
//! Offset 2*block_size:   block 2
//! ...
//! ```
//!
//! The file size must be an exact multiple of the block size. The block
//! count is fixed at creation; a B+Tree store never grows, it runs its free
//! list dry instead.
//!
//! ## Safety Model
//!
//! The mapping lives exactly as long as the `MmapStore`, and all access goes
//! through bounds-checked `read_block`/`write_block`, so no slice into the
//! mapping ever escapes. Since the store is never remapped, the usual
//! grow/remap hazards do not arise.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::MmapMut;

use crate::error::{IndexError, Result};
use crate::storage::BlockStore;

#[derive(Debug)]
pub struct MmapStore {
    mmap: MmapMut,
    block_size: usize,
    block_count: u32,
}

impl MmapStore {
    /// Create a new store file of `block_count` zeroed blocks, truncating
    /// any existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, block_count: u32) -> Result<Self> {
        if block_size == 0 || block_count == 0 {
            return Err(IndexError::Insane("store geometry must be non-zero"));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.set_len(block_size as u64 * block_count as u64)?;

        // SAFETY: MmapMut::map_mut is unsafe because externally modified
        // files lead to undefined behavior. This is safe because:
        // 1. The file was just created with truncate=true and sized by us
        // 2. Store files are not meant to be touched by other processes
        // 3. The mapping's lifetime is tied to MmapStore; no slice escapes
        //    because all access goes through bounds-checked block copies
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            mmap,
            block_size,
            block_count,
        })
    }

    /// Open an existing store file. The block count is derived from the file
    /// size, which must be a non-zero multiple of `block_size`.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self> {
        if block_size == 0 {
            return Err(IndexError::Insane("store geometry must be non-zero"));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_size = file.metadata()?.len();

        if file_size == 0 || file_size % block_size as u64 != 0 {
            return Err(IndexError::Insane(
                "store file size is not a multiple of the block size",
            ));
        }

        let block_count = (file_size / block_size as u64) as u32;
        let mmap = Self::map(&file)?;

        Ok(Self {
            mmap,
            block_size,
            block_count,
        })
    }

    fn map(file: &File) -> Result<MmapMut> {
        // SAFETY: see `create`; the same conditions hold for files we open
        // with exclusive read+write intent, and the mapping never outlives
        // the store that owns the file handle.
        Ok(unsafe { MmapMut::map_mut(file)? })
    }

    /// Flush the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn block_range(&self, index: u32) -> Result<std::ops::Range<usize>> {
        let limit = self.block_count as usize;
        let index = index as usize;
        if index >= limit {
            return Err(IndexError::BadOffset { index, limit });
        }
        let start = index * self.block_size;
        Ok(start..start + self.block_size)
    }

    fn check_len(&self, what: &'static str, len: usize) -> Result<()> {
        if len != self.block_size {
            return Err(IndexError::WrongLength {
                what,
                expected: self.block_size,
                got: len,
            });
        }
        Ok(())
    }
}

impl BlockStore for MmapStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_block(&mut self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.check_len("read buffer", buf.len())?;
        let range = self.block_range(index)?;
        buf.copy_from_slice(&self.mmap[range]);
        Ok(())
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        self.check_len("write buffer", data.len())?;
        let range = self.block_range(index)?;
        self.mmap[range].copy_from_slice(data);
        Ok(())
    }
}
