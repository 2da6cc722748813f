use lru::LruCache;
use std::num::NonZeroUsize;

use super::BlockId;
use super::container::ContainerFile;
use super::error::{FileError, FileResult};

/// Hit/miss counters for the block cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub cached_blocks: usize,
}

/// Block-granular access to the data region with an LRU read cache
///
/// Writes go straight to the file and refresh the cached copy, so the cache
/// never holds data that differs from disk.
pub struct BlockStore {
    /// Underlying container file
    file: ContainerFile,
    /// Cached block contents, `None` when caching is disabled
    cache: Option<LruCache<BlockId, Vec<u8>>>,
    block_size: usize,
    /// Byte offset of block 0
    data_offset: u64,
    hits: u64,
    misses: u64,
}

impl BlockStore {
    /// Create a block store; a capacity of 0 disables caching
    pub fn new(file: ContainerFile, block_size: usize, data_offset: u64, capacity: usize) -> Self {
        Self {
            file,
            cache: NonZeroUsize::new(capacity).map(LruCache::new),
            block_size,
            data_offset,
            hits: 0,
            misses: 0,
        }
    }

    /// Get a reference to the container file
    pub fn file(&self) -> &ContainerFile {
        &self.file
    }

    /// Get a mutable reference to the container file
    pub fn file_mut(&mut self) -> &mut ContainerFile {
        &mut self.file
    }

    /// Absolute byte offset of a block
    pub fn block_offset(&self, block: BlockId) -> u64 {
        self.data_offset + block as u64 * self.block_size as u64
    }

    /// Read a whole block, serving it from the cache when possible
    pub fn read_block(&mut self, block: BlockId) -> FileResult<Vec<u8>> {
        if let Some(cache) = self.cache.as_mut()
            && let Some(data) = cache.get(&block)
        {
            self.hits += 1;
            return Ok(data.clone());
        }

        self.misses += 1;
        let offset = self.block_offset(block);
        let data = self.file.read_vec(offset, self.block_size)?;

        if let Some(cache) = self.cache.as_mut() {
            cache.put(block, data.clone());
        }

        Ok(data)
    }

    /// Write one block; shorter data is zero padded to the block size
    pub fn write_block(&mut self, block: BlockId, data: &[u8]) -> FileResult<()> {
        if data.len() > self.block_size {
            return Err(FileError::InvalidBlockSize {
                expected: self.block_size,
                actual: data.len(),
            });
        }

        let mut buffer = vec![0u8; self.block_size];
        buffer[..data.len()].copy_from_slice(data);

        let offset = self.block_offset(block);
        self.file.write_at(offset, &buffer)?;

        if let Some(cache) = self.cache.as_mut() {
            cache.put(block, buffer);
        }

        Ok(())
    }

    /// Write `data` across consecutive blocks starting at `start`,
    /// zero padding the last one
    pub fn write_blocks(&mut self, start: BlockId, data: &[u8]) -> FileResult<()> {
        let count = data.len().div_ceil(self.block_size);
        let mut buffer = vec![0u8; count * self.block_size];
        buffer[..data.len()].copy_from_slice(data);

        let offset = self.block_offset(start);
        self.file.write_at(offset, &buffer)?;
        self.invalidate(start, count as u32);

        Ok(())
    }

    /// Zero-fill `count` blocks starting at `start`
    pub fn zero_blocks(&mut self, start: BlockId, count: u32) -> FileResult<()> {
        if count == 0 {
            return Ok(());
        }

        let offset = self.block_offset(start);
        self.file
            .zero_range(offset, count as usize * self.block_size)?;
        self.invalidate(start, count);

        Ok(())
    }

    /// Drop cached copies of a block range
    pub fn invalidate(&mut self, start: BlockId, count: u32) {
        if let Some(cache) = self.cache.as_mut() {
            for block in start..start.saturating_add(count) {
                cache.pop(&block);
            }
        }
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            cached_blocks: self.cache.as_ref().map_or(0, |cache| cache.len()),
        }
    }

    /// Sync the container file to disk
    pub fn sync(&mut self) -> FileResult<()> {
        self.file.sync()
    }
}
