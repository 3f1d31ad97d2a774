//! # In-Memory Block Store
//!
//! `MemStore` keeps every block on the heap. It exists for tests, examples,
//! and as the simplest possible [`BlockStore`]: no file, no mapping, just a
//! `Vec` of boxed blocks with the same bounds discipline the on-disk stores
//! enforce.

use crate::error::{IndexError, Result};
use crate::storage::BlockStore;

#[derive(Debug)]
pub struct MemStore {
    block_size: usize,
    blocks: Vec<Box<[u8]>>,
}

impl MemStore {
    pub fn new(block_size: usize, block_count: u32) -> Self {
        let blocks = (0..block_count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();
        Self { block_size, blocks }
    }

    fn check_index(&self, index: u32) -> Result<usize> {
        let limit = self.blocks.len();
        let index = index as usize;
        if index >= limit {
            return Err(IndexError::BadOffset { index, limit });
        }
        Ok(index)
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

impl BlockStore for MemStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u32 {
        self.blocks.len() as u32
    }

    fn read_block(&mut self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.check_len("read buffer", buf.len())?;
        let index = self.check_index(index)?;
        buf.copy_from_slice(&self.blocks[index]);
        Ok(())
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        self.check_len("write buffer", data.len())?;
        let index = self.check_index(index)?;
        self.blocks[index].copy_from_slice(data);
        Ok(())
    }
}
