pub mod allocator;
pub mod btree;
pub mod config;
pub mod fcb;
pub mod file;
pub mod loader;
pub mod metadata;
pub mod record;
pub mod storage;

pub use allocator::{Bitmap, BlockAllocator};
pub use btree::{BTreeError, BTreeIndex, BTreeResult, IndexKey};
pub use config::{ConfigError, EngineConfig, EngineConfigBuilder};
pub use fcb::{Fcb, FcbDirectory, FcbError};
pub use file::{BlockId, BlockStore, CacheStats, ContainerFile, FileError, FileResult};
pub use loader::{LoaderError, LoaderResult};
pub use metadata::{Layout, MetadataError, MetadataResult, Superblock};
pub use record::{Record, RecordError, RecordResult};
pub use storage::{DatabaseInfo, StorageEngine, StorageError, StorageResult};
