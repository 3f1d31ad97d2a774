//! # Write-Through Block Cache
//!
//! `BlockCache` decorates any [`BlockStore`] with an in-memory block cache.
//! Reads are served from the cache when possible; writes go to the cache and
//! the inner store in the same call, so the cache never holds dirty state
//! and eviction is free.
//!
//! ## Eviction
//!
//! FIFO over cached block indices. The index's access patterns are
//! root-heavy, and a write-through cache that re-admits on every read keeps
//! the hot upper levels resident without any recency machinery.
//!
//! ## Accounting
//!
//! The cache counts logical reads and writes plus hits and misses, and
//! tracks which blocks the index currently considers allocated (fed by the
//! allocate/deallocate notifications). The REPL's `.stats` command surfaces
//! these numbers.

use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

use crate::error::Result;
use crate::storage::BlockStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub reads: u64,
    pub writes: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
pub struct BlockCache<S: BlockStore> {
    inner: S,
    capacity: usize,
    cache: HashMap<u32, Box<[u8]>>,
    order: VecDeque<u32>,
    allocated: HashSet<u32>,
    stats: CacheStats,
}

impl<S: BlockStore> BlockCache<S> {
    pub fn new(inner: S, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            cache: HashMap::new(),
            order: VecDeque::new(),
            allocated: HashSet::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Blocks the index has allocated and not yet returned to the free list.
    pub fn allocated_blocks(&self) -> usize {
        self.allocated.len()
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn admit(&mut self, index: u32, data: &[u8]) {
        if let Some(slot) = self.cache.get_mut(&index) {
            slot.copy_from_slice(data);
            return;
        }
        while self.cache.len() >= self.capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    self.cache.remove(&evicted);
                }
                None => break,
            }
        }
        self.cache.insert(index, data.to_vec().into_boxed_slice());
        self.order.push_back(index);
    }

    fn forget(&mut self, index: u32) {
        if self.cache.remove(&index).is_some() {
            self.order.retain(|&i| i != index);
        }
    }
}

impl<S: BlockStore> BlockStore for BlockCache<S> {
    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn block_count(&self) -> u32 {
        self.inner.block_count()
    }

    fn read_block(&mut self, index: u32, buf: &mut [u8]) -> Result<()> {
        self.stats.reads += 1;
        if let Some(data) = self.cache.get(&index) {
            if data.len() == buf.len() {
                self.stats.hits += 1;
                buf.copy_from_slice(data);
                return Ok(());
            }
        }
        self.stats.misses += 1;
        self.inner.read_block(index, buf)?;
        self.admit(index, buf);
        Ok(())
    }

    fn write_block(&mut self, index: u32, data: &[u8]) -> Result<()> {
        self.stats.writes += 1;
        self.inner.write_block(index, data)?;
        self.admit(index, data);
        Ok(())
    }

    fn notify_allocate(&mut self, index: u32) {
        self.allocated.insert(index);
        self.inner.notify_allocate(index);
    }

    fn notify_deallocate(&mut self, index: u32) {
        self.allocated.remove(&index);
        self.forget(index);
        self.inner.notify_deallocate(index);
    }
}
