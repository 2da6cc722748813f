//! Engine configuration
//!
//! Defaults match the on-disk layout: 256-byte blocks, a 16-block header and
//! containers that start at and grow by 1 MiB.

use thiserror::Error;

use crate::file::DEFAULT_CACHE_BLOCKS;
use crate::metadata::Layout;

pub const DEFAULT_BLOCK_SIZE: u32 = 256;
pub const DEFAULT_INITIAL_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_GROWTH_SIZE: u64 = 1024 * 1024;

/// Smallest block size accepted; 16 such blocks leave room for the bitmap
pub const MIN_BLOCK_SIZE: u32 = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Block size {0} is below the minimum of 64")]
    BlockSizeTooSmall(u32),

    #[error("Initial file size {size} must exceed the header ({header} bytes) by at least one block")]
    InitialSizeTooSmall { size: u64, header: u64 },

    #[error("Initial file size needs {blocks} blocks but the bitmap covers at most {max}")]
    InitialSizeTooLarge { blocks: u64, max: u64 },

    #[error("Growth size {size} is smaller than one block ({block_size} bytes)")]
    GrowthTooSmall { size: u64, block_size: u32 },
}

/// Tunables for one open container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Bytes per data block (fixed for the life of a container)
    pub block_size: u32,

    /// Size of a freshly created container, header included
    pub initial_file_size: u64,

    /// Bytes added each time the container runs out of blocks
    pub growth_size: u64,

    /// Data blocks kept in the LRU read cache (0 disables it)
    pub block_cache_capacity: usize,

    /// fsync after every mutating operation
    pub sync_on_write: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            initial_file_size: DEFAULT_INITIAL_FILE_SIZE,
            growth_size: DEFAULT_GROWTH_SIZE,
            block_cache_capacity: DEFAULT_CACHE_BLOCKS,
            sync_on_write: false,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.block_size)
    }

    /// Check that the values describe a usable container
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size < MIN_BLOCK_SIZE {
            return Err(ConfigError::BlockSizeTooSmall(self.block_size));
        }

        let layout = self.layout();
        let header = layout.header_size();
        if self.initial_file_size < header + self.block_size as u64 {
            return Err(ConfigError::InitialSizeTooSmall {
                size: self.initial_file_size,
                header,
            });
        }

        let blocks = layout.blocks_for_size(self.initial_file_size);
        if blocks > layout.max_blocks() {
            return Err(ConfigError::InitialSizeTooLarge {
                blocks,
                max: layout.max_blocks(),
            });
        }

        if self.growth_size < self.block_size as u64 {
            return Err(ConfigError::GrowthTooSmall {
                size: self.growth_size,
                block_size: self.block_size,
            });
        }

        Ok(())
    }
}

/// Builder for EngineConfig
#[derive(Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Set the block size (in bytes)
    pub fn block_size(mut self, size: u32) -> Self {
        self.config.block_size = size;
        self
    }

    /// Set the size of newly created containers (in bytes)
    pub fn initial_file_size(mut self, size: u64) -> Self {
        self.config.initial_file_size = size;
        self
    }

    /// Set the growth increment (in bytes)
    pub fn growth_size(mut self, size: u64) -> Self {
        self.config.growth_size = size;
        self
    }

    /// Set the number of cached data blocks
    pub fn block_cache_capacity(mut self, blocks: usize) -> Self {
        self.config.block_cache_capacity = blocks;
        self
    }

    pub fn sync_on_write(mut self, enabled: bool) -> Self {
        self.config.sync_on_write = enabled;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = EngineConfig::default();

        assert_eq!(config.block_size, 256);
        assert_eq!(config.layout().header_size(), 4096);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .block_size(128)
            .initial_file_size(64 * 1024)
            .growth_size(8 * 1024)
            .block_cache_capacity(0)
            .sync_on_write(true)
            .build();

        assert_eq!(config.block_size, 128);
        assert_eq!(config.initial_file_size, 64 * 1024);
        assert_eq!(config.growth_size, 8 * 1024);
        assert_eq!(config.block_cache_capacity, 0);
        assert!(config.sync_on_write);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_block_size_too_small() {
        let config = EngineConfig::builder().block_size(32).build();
        assert_eq!(config.validate(), Err(ConfigError::BlockSizeTooSmall(32)));
    }

    #[test]
    fn test_initial_size_bounds() {
        let config = EngineConfig::builder().initial_file_size(4096).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InitialSizeTooSmall { header: 4096, .. })
        ));

        // 256-byte blocks: the bitmap covers 28672 blocks
        let config = EngineConfig::builder()
            .initial_file_size(4096 + 28673 * 256)
            .build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InitialSizeTooLarge { max: 28672, .. })
        ));
    }

    #[test]
    fn test_growth_too_small() {
        let config = EngineConfig::builder().growth_size(100).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GrowthTooSmall { size: 100, .. })
        ));
    }
}
