//! Bitmap block allocator for the data region

mod bitmap;

pub use bitmap::Bitmap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::file::{BlockId, ContainerFile};
use crate::metadata::{MetadataError, MetadataResult, Superblock, bitmap_len};

/// Owns the allocation bitmap of one open container
///
/// Mutations only touch memory; call [`BlockAllocator::persist`] before relying
/// on the on-disk bitmap.
#[derive(Debug)]
pub struct BlockAllocator {
    bitmap: Mutex<Bitmap>,
}

impl BlockAllocator {
    /// Allocator with every block free
    pub fn new(total_blocks: u64) -> Self {
        Self {
            bitmap: Mutex::new(Bitmap::new(total_blocks)),
        }
    }

    /// Load the bitmap stored in the superblock region
    pub fn load(file: &mut ContainerFile, superblock: &Superblock) -> MetadataResult<Self> {
        let bytes = superblock.read_bitmap(file)?;
        Ok(Self {
            bitmap: Mutex::new(Bitmap::from_bytes(bytes, superblock.total_blocks)),
        })
    }

    pub fn find_first_free(&self) -> Option<BlockId> {
        let bitmap = self.bitmap.lock();
        bitmap.first_clear_from(0).and_then(to_block_id)
    }

    /// Reserve the first free block at or after `start`
    pub fn allocate_from(&self, start: BlockId) -> Option<BlockId> {
        let mut bitmap = self.bitmap.lock();
        let index = bitmap.first_clear_from(start as u64)?;
        let block = to_block_id(index)?;
        bitmap.set(index);
        Some(block)
    }

    /// Reserve the first run of `count` free blocks, returning the ids in order
    pub fn allocate_contiguous(&self, count: u32) -> Option<Vec<BlockId>> {
        if count == 0 {
            return Some(Vec::new());
        }

        let mut bitmap = self.bitmap.lock();
        let start = bitmap.find_clear_run(count as u64)?;
        let first = to_block_id(start)?;
        let last = to_block_id(start + count as u64 - 1)?;

        for block in first..=last {
            bitmap.set(block as u64);
        }
        Some((first..=last).collect())
    }

    /// Free `[start, start + count)`; indices past the end are ignored
    pub fn release_range(&self, start: BlockId, count: u32) {
        let mut bitmap = self.bitmap.lock();
        let end = (start as u64 + count as u64).min(bitmap.len());
        for index in start as u64..end {
            bitmap.clear(index);
        }
    }

    /// Extend the container to `new_total_size` bytes and persist the new
    /// block count along with the enlarged bitmap
    ///
    /// The in-memory bitmap only changes once the superblock is written; on a
    /// failed write the file is cut back to its previous length.
    pub fn grow(
        &self,
        file: &mut ContainerFile,
        superblock: &mut Superblock,
        new_total_size: u64,
    ) -> MetadataResult<()> {
        let old_size = superblock.total_size;
        if new_total_size <= old_size {
            return Err(MetadataError::InvalidGrowth {
                current: old_size,
                requested: new_total_size,
            });
        }

        let layout = superblock.layout();
        let new_blocks = layout.blocks_for_size(new_total_size);
        if new_blocks > layout.max_blocks() {
            return Err(MetadataError::BitmapOverflow {
                needed: bitmap_len(new_blocks),
                capacity: layout.bitmap_capacity(),
            });
        }

        let mut bitmap = self.bitmap.lock();
        let old_blocks = bitmap.len();
        let mut grown = bitmap.clone();
        grown.resize(new_blocks);

        file.set_len(new_total_size)?;
        let written = superblock
            .write_bitmap(file, grown.as_bytes())
            .and_then(|()| superblock.write_total_size(file, new_total_size));
        if let Err(err) = written {
            superblock.total_size = old_size;
            superblock.total_blocks = old_blocks;
            if let Err(restore) = file.set_len(old_size) {
                warn!("Could not restore container length {}: {}", old_size, restore);
            }
            return Err(err);
        }
        *bitmap = grown;

        info!(
            "Grew container to {} bytes ({} -> {} blocks)",
            new_total_size, old_blocks, new_blocks
        );

        Ok(())
    }

    /// Write the bitmap and block count through the superblock
    pub fn persist(
        &self,
        file: &mut ContainerFile,
        superblock: &mut Superblock,
    ) -> MetadataResult<()> {
        let bitmap = self.bitmap.lock();
        superblock.write_bitmap(file, bitmap.as_bytes())?;
        superblock.write_total_blocks(file, bitmap.len())?;

        debug!(
            "Persisted bitmap: {} of {} blocks used",
            bitmap.count_ones(),
            bitmap.len()
        );

        Ok(())
    }

    pub fn is_used(&self, block: BlockId) -> bool {
        self.bitmap.lock().get(block as u64)
    }

    pub fn used_blocks(&self) -> u64 {
        self.bitmap.lock().count_ones()
    }

    pub fn free_blocks(&self) -> u64 {
        let bitmap = self.bitmap.lock();
        bitmap.len() - bitmap.count_ones()
    }

    pub fn total_blocks(&self) -> u64 {
        self.bitmap.lock().len()
    }

    /// Copy of the raw bitmap bytes
    pub fn as_bytes(&self) -> Vec<u8> {
        self.bitmap.lock().as_bytes().to_vec()
    }
}

fn to_block_id(index: u64) -> Option<BlockId> {
    BlockId::try_from(index).ok()
}
