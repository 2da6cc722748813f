mod block_store;
mod container;
mod error;

pub use block_store::{BlockStore, CacheStats};
pub use container::ContainerFile;
pub use error::{FileError, FileResult};

/// Block ID type (index into the data region)
pub type BlockId = u32;

/// Default number of data blocks kept in the block cache
pub const DEFAULT_CACHE_BLOCKS: usize = 64;
