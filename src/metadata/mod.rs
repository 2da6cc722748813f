//! Container header: fixed-offset superblock fields, the FCB directory region
//! and the allocation bitmap

mod error;
mod superblock;

pub use error::{MetadataError, MetadataResult};
pub use superblock::{Superblock, validate_name};

use crate::file::BlockId;

/// Number of blocks reserved for the header
pub const HEADER_BLOCKS: u64 = 16;

/// Size of the superblock area (fields + FCB directory); the bitmap follows it
pub const METADATA_SIZE: u64 = 512;

pub const DATABASE_NAME_OFFSET: u64 = 0;
pub const DATABASE_NAME_SIZE: usize = 20;
pub const TOTAL_SIZE_OFFSET: u64 = DATABASE_NAME_OFFSET + DATABASE_NAME_SIZE as u64;
pub const TOTAL_BLOCKS_OFFSET: u64 = TOTAL_SIZE_OFFSET + 8;
pub const PFS_FILES_LIST_OFFSET: u64 = TOTAL_BLOCKS_OFFSET + 8;
pub const PFS_FILES_LIST_SIZE: usize = 256;
pub const KEY_VALUE_ENTRIES_OFFSET: u64 = PFS_FILES_LIST_OFFSET + PFS_FILES_LIST_SIZE as u64;
pub const CREATE_DATE_OFFSET: u64 = KEY_VALUE_ENTRIES_OFFSET + 4;
pub const BLOCK_SIZE_OFFSET: u64 = CREATE_DATE_OFFSET + 8;
pub const FCB_LIST_OFFSET: u64 = BLOCK_SIZE_OFFSET + 4;
pub const FCB_LIST_SIZE: usize = (METADATA_SIZE - FCB_LIST_OFFSET) as usize;
pub const BITMAP_OFFSET: u64 = METADATA_SIZE;

/// Geometry derived from the block size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub block_size: u32,
}

impl Layout {
    pub fn new(block_size: u32) -> Self {
        Self { block_size }
    }

    /// Total header size (superblock, directory and bitmap)
    pub fn header_size(&self) -> u64 {
        HEADER_BLOCKS * self.block_size as u64
    }

    /// Absolute byte offset of a data block
    pub fn block_offset(&self, block: BlockId) -> u64 {
        self.header_size() + block as u64 * self.block_size as u64
    }

    /// Block containing an absolute byte offset inside the data region
    pub fn block_at(&self, offset: u64) -> Option<BlockId> {
        let relative = offset.checked_sub(self.header_size())?;
        BlockId::try_from(relative / self.block_size as u64).ok()
    }

    /// Data blocks available in a file of `total_size` bytes
    pub fn blocks_for_size(&self, total_size: u64) -> u64 {
        total_size.saturating_sub(self.header_size()) / self.block_size as u64
    }

    /// Number of blocks needed to hold `len` bytes
    pub fn blocks_for_len(&self, len: usize) -> u32 {
        len.div_ceil(self.block_size as usize) as u32
    }

    /// Bytes available to the bitmap between the superblock and the data region
    pub fn bitmap_capacity(&self) -> usize {
        self.header_size().saturating_sub(BITMAP_OFFSET) as usize
    }

    /// Largest block count the bitmap region can describe
    pub fn max_blocks(&self) -> u64 {
        self.bitmap_capacity() as u64 * 8
    }
}

/// Bitmap length in bytes for `total_blocks` bits
pub fn bitmap_len(total_blocks: u64) -> usize {
    total_blocks.div_ceil(8) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_offsets() {
        assert_eq!(TOTAL_SIZE_OFFSET, 20);
        assert_eq!(TOTAL_BLOCKS_OFFSET, 28);
        assert_eq!(PFS_FILES_LIST_OFFSET, 36);
        assert_eq!(KEY_VALUE_ENTRIES_OFFSET, 292);
        assert_eq!(CREATE_DATE_OFFSET, 296);
        assert_eq!(BLOCK_SIZE_OFFSET, 304);
        assert_eq!(FCB_LIST_OFFSET, 308);
        assert_eq!(FCB_LIST_SIZE, 204);
        assert_eq!(BITMAP_OFFSET, 512);
    }

    #[test]
    fn test_default_layout() {
        let layout = Layout::new(256);

        assert_eq!(layout.header_size(), 4096);
        assert_eq!(layout.block_offset(0), 4096);
        assert_eq!(layout.block_offset(3), 4096 + 768);
        assert_eq!(layout.blocks_for_size(1024 * 1024), 4080);
        assert_eq!(layout.bitmap_capacity(), 3584);
        assert_eq!(layout.max_blocks(), 28672);
    }

    #[test]
    fn test_block_at() {
        let layout = Layout::new(256);

        assert_eq!(layout.block_at(4096), Some(0));
        assert_eq!(layout.block_at(4096 + 255), Some(0));
        assert_eq!(layout.block_at(4096 + 256), Some(1));
        assert_eq!(layout.block_at(100), None);
    }

    #[test]
    fn test_lengths() {
        let layout = Layout::new(256);

        assert_eq!(layout.blocks_for_len(0), 0);
        assert_eq!(layout.blocks_for_len(1), 1);
        assert_eq!(layout.blocks_for_len(256), 1);
        assert_eq!(layout.blocks_for_len(257), 2);
        assert_eq!(bitmap_len(4080), 510);
        assert_eq!(bitmap_len(9), 2);
    }
}
