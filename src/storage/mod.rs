//! Storage engine: ties block allocation, record packing, the tree index and
//! the FCB directory together over one container file

mod error;
mod packer;


pub use error::{StorageError, StorageResult};

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::allocator::BlockAllocator;
use crate::btree::{BTreeError, BTreeIndex, IndexKey, deserialize_tree, serialize_tree};
use crate::config::EngineConfig;
use crate::fcb::{self, Fcb, FcbDirectory};
use crate::file::{BlockId, BlockStore, CacheStats, ContainerFile};
use crate::metadata::{self, Layout, Superblock};
use crate::record::{self, Record};

use packer::BlockPacker;

/// Summary of an open container
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseInfo {
    pub name: String,
    pub path: PathBuf,
    pub total_size: u64,
    pub block_size: u32,
    pub header_size: u64,
    pub total_blocks: u64,
    pub used_blocks: u64,
    pub free_blocks: u64,
    /// Bytes still available in free blocks
    pub remaining_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub file_count: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

/// One open container
pub struct StorageEngine {
    store: BlockStore,
    superblock: Superblock,
    allocator: BlockAllocator,
    config: EngineConfig,
}

impl StorageEngine {
    /// Create a new container at `path` named `db_name`
    pub fn create<P: AsRef<Path>>(
        path: P,
        db_name: &str,
        config: EngineConfig,
    ) -> StorageResult<Self> {
        config.validate()?;
        metadata::validate_name(db_name)?;

        let mut file = ContainerFile::create(path.as_ref(), config.initial_file_size)?;
        let superblock = Superblock::initialize(
            &mut file,
            db_name,
            config.initial_file_size,
            config.block_size,
            Utc::now(),
        )?;
        let allocator = BlockAllocator::new(superblock.total_blocks);

        info!(
            "Created container '{}' at {} ({} blocks of {} bytes)",
            db_name,
            path.as_ref().display(),
            superblock.total_blocks,
            superblock.block_size
        );

        let mut engine = Self::assemble(file, superblock, allocator, config);
        engine.sync_if_configured()?;
        Ok(engine)
    }

    /// Open an existing container
    ///
    /// The block size stored in the superblock wins over the configured one.
    pub fn open<P: AsRef<Path>>(path: P, mut config: EngineConfig) -> StorageResult<Self> {
        let mut file = ContainerFile::open(path.as_ref())?;
        let superblock = Superblock::read(&mut file)?;

        if superblock.block_size != config.block_size {
            warn!(
                "Container uses {}-byte blocks, ignoring configured {}",
                superblock.block_size, config.block_size
            );
            config.block_size = superblock.block_size;
        }

        let allocator = BlockAllocator::load(&mut file, &superblock)?;

        info!(
            "Opened container '{}' at {} ({} of {} blocks used)",
            superblock.name,
            path.as_ref().display(),
            allocator.used_blocks(),
            allocator.total_blocks()
        );

        Ok(Self::assemble(file, superblock, allocator, config))
    }

    /// Open `path` if it exists, otherwise create it
    pub fn open_or_create<P: AsRef<Path>>(
        path: P,
        db_name: &str,
        config: EngineConfig,
    ) -> StorageResult<Self> {
        if path.as_ref().exists() {
            Self::open(path, config)
        } else {
            Self::create(path, db_name, config)
        }
    }

    fn assemble(
        file: ContainerFile,
        superblock: Superblock,
        allocator: BlockAllocator,
        config: EngineConfig,
    ) -> Self {
        let layout = superblock.layout();
        let store = BlockStore::new(
            file,
            layout.block_size as usize,
            layout.header_size(),
            config.block_cache_capacity,
        );

        Self {
            store,
            superblock,
            allocator,
            config,
        }
    }

    pub fn superblock(&self) -> &Superblock {
        &self.superblock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn path(&self) -> &Path {
        self.store.file().path()
    }

    pub fn allocator(&self) -> &BlockAllocator {
        &self.allocator
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.cache_stats()
    }

    fn layout(&self) -> Layout {
        self.superblock.layout()
    }

    fn directory(&mut self) -> FcbDirectory<'_> {
        FcbDirectory::new(self.store.file_mut())
    }

    // ========== Import ==========

    /// Pack `records` into data blocks, build and persist their index, and
    /// register the file under `name`
    ///
    /// On failure every block the import allocated is released and zeroed.
    pub fn import<I>(&mut self, name: &str, records: I) -> StorageResult<Fcb>
    where
        I: IntoIterator<Item = Record>,
    {
        fcb::validate_name(name)?;
        if self.directory().find_by_name(name)?.is_some() {
            return Err(StorageError::AlreadyExists(name.to_string()));
        }

        let mut allocated = Vec::new();
        match self.import_records(name, records, &mut allocated) {
            Ok(fcb) => {
                info!(
                    "Imported '{}': {} data blocks, {} bytes, index {}..{}",
                    fcb.name, fcb.used_blocks, fcb.file_size, fcb.index_start, fcb.index_end
                );
                self.sync_if_configured()?;
                Ok(fcb)
            }
            Err(err) => {
                warn!("Import of '{}' failed: {}", name, err);
                self.rollback(&allocated);
                Err(err)
            }
        }
    }

    fn import_records<I>(
        &mut self,
        name: &str,
        records: I,
        allocated: &mut Vec<BlockId>,
    ) -> StorageResult<Fcb>
    where
        I: IntoIterator<Item = Record>,
    {
        // Stored with millisecond precision
        let created_at = Utc::now().trunc_subsecs(3);
        let block_size = self.layout().block_size as usize;
        let mut tree = BTreeIndex::new();
        let mut packer = BlockPacker::new(block_size);
        let mut data_blocks = 0u32;

        for record in records {
            let bytes = record.encode()?;
            if bytes.len() > block_size {
                return Err(StorageError::RecordTooLarge {
                    key: record.key,
                    size: bytes.len(),
                    block_size,
                });
            }
            if tree.contains(record.key) {
                return Err(StorageError::DuplicateKey {
                    name: name.to_string(),
                    key: record.key,
                });
            }

            if !packer.fits(bytes.len()) {
                let block = self.allocate_block(packer.next_search_start(), allocated)?;
                data_blocks += 1;
                if let Some((full, data)) = packer.start_block(block) {
                    self.store.write_block(full, &data)?;
                }
            }

            let block = packer.current_block().ok_or_else(|| {
                StorageError::Corrupt("packer has no block after allocation".to_string())
            })?;
            tree.insert(record.key, block)?;
            packer.push(&bytes);
        }

        let file_size = u32::try_from(packer.total_bytes()).map_err(|_| {
            StorageError::CapacityExceeded(format!(
                "{} bytes of records exceed the 4 GiB file limit",
                packer.total_bytes()
            ))
        })?;
        let start_block = match allocated.first() {
            Some(&block) => block,
            None => self.allocator.find_first_free().unwrap_or(0),
        };

        if let Some((block, data)) = packer.finish() {
            self.store.write_block(block, &data)?;
        }
        self.persist_allocator()?;

        let (index_start, index_end) = self.write_index(&tree, allocated)?;

        let fcb = Fcb {
            name: name.to_string(),
            start_block,
            used_blocks: data_blocks,
            file_size,
            created_at,
            index_start,
            index_end,
        };
        self.directory().upsert(&fcb)?;

        Ok(fcb)
    }

    /// Serialize `tree` into a contiguous run of blocks, returning its byte range
    fn write_index(
        &mut self,
        tree: &BTreeIndex,
        allocated: &mut Vec<BlockId>,
    ) -> StorageResult<(u64, u64)> {
        let bytes = serialize_tree(tree);
        let count = self.layout().blocks_for_len(bytes.len());

        let run = self.allocate_run(count, allocated)?;
        let first = *run.first().ok_or_else(|| {
            StorageError::Corrupt("empty block run for a non-empty index".to_string())
        })?;

        self.store.write_blocks(first, &bytes)?;
        self.persist_allocator()?;

        let start = self.layout().block_offset(first);
        debug!(
            "Wrote index: {} bytes in {} blocks from block {}",
            bytes.len(),
            count,
            first
        );
        Ok((start, start + bytes.len() as u64))
    }

    /// Reserve the first free block at or after `start`, growing the
    /// container once and rescanning from block 0 when none is left
    fn allocate_block(
        &mut self,
        start: BlockId,
        allocated: &mut Vec<BlockId>,
    ) -> StorageResult<BlockId> {
        let block = match self.allocator.allocate_from(start) {
            Some(block) => block,
            None => {
                self.grow(self.config.growth_size)?;
                self.allocator.allocate_from(0).ok_or_else(|| {
                    StorageError::CapacityExceeded("no free block after growing".to_string())
                })?
            }
        };

        allocated.push(block);
        Ok(block)
    }

    /// Reserve `count` contiguous blocks, growing the container once if needed
    fn allocate_run(
        &mut self,
        count: u32,
        allocated: &mut Vec<BlockId>,
    ) -> StorageResult<Vec<BlockId>> {
        let run = match self.allocator.allocate_contiguous(count) {
            Some(run) => run,
            None => {
                let needed = count as u64 * self.layout().block_size as u64;
                let growth = self.config.growth_size;
                self.grow(needed.div_ceil(growth) * growth)?;
                self.allocator.allocate_contiguous(count).ok_or_else(|| {
                    StorageError::CapacityExceeded(format!(
                        "no run of {} free blocks after growing",
                        count
                    ))
                })?
            }
        };

        allocated.extend_from_slice(&run);
        Ok(run)
    }

    /// Extend the container by `additional` bytes
    fn grow(&mut self, additional: u64) -> StorageResult<()> {
        let new_size = self.superblock.total_size + additional;
        self.allocator
            .grow(self.store.file_mut(), &mut self.superblock, new_size)?;
        Ok(())
    }

    fn persist_allocator(&mut self) -> StorageResult<()> {
        self.allocator
            .persist(self.store.file_mut(), &mut self.superblock)?;
        Ok(())
    }

    /// Undo a failed import; cleanup failures are only logged
    fn rollback(&mut self, allocated: &[BlockId]) {
        if allocated.is_empty() {
            return;
        }

        let runs = block_runs(allocated.iter().copied().collect::<BTreeSet<_>>());
        for &(start, count) in &runs {
            self.allocator.release_range(start, count);
            if let Err(err) = self.store.zero_blocks(start, count) {
                warn!("Rollback could not zero blocks {}+{}: {}", start, count, err);
            }
        }
        if let Err(err) = self.persist_allocator() {
            warn!("Rollback could not persist the bitmap: {}", err);
        }

        debug!("Rolled back {} blocks", allocated.len());
    }

    // ========== Queries ==========

    fn require(&mut self, name: &str) -> StorageResult<Fcb> {
        self.directory()
            .find_by_name(name)?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))
    }

    /// Read and decode the index stored for `fcb`
    pub fn load_index(&mut self, fcb: &Fcb) -> StorageResult<BTreeIndex> {
        if !fcb.has_index() {
            return Ok(BTreeIndex::new());
        }

        let len = usize::try_from(fcb.index_len()).map_err(|_| {
            StorageError::Corrupt(format!("index of '{}' is too large", fcb.name))
        })?;
        let bytes = self.store.file_mut().read_vec(fcb.index_start, len)?;
        Ok(deserialize_tree(&bytes)?)
    }

    /// Point lookup of `key` in the file `name`
    pub fn find(&mut self, name: &str, key: IndexKey) -> StorageResult<Record> {
        let fcb = self.require(name)?;
        let tree = self.load_index(&fcb)?;

        let block = tree.search(key).ok_or_else(|| StorageError::KeyNotFound {
            name: name.to_string(),
            key,
        })?;
        let data = self.store.read_block(block)?;

        record::find_in_block(&data, key)?.ok_or_else(|| {
            StorageError::Corrupt(format!(
                "key {} of '{}' is indexed at block {} but not stored there",
                key, name, block
            ))
        })
    }

    /// Every record of `name`, walking keys 1, 2, 3, ... until one is missing
    pub fn export(&mut self, name: &str) -> StorageResult<Vec<Record>> {
        let fcb = self.require(name)?;
        let tree = self.load_index(&fcb)?;

        let mut records = Vec::with_capacity(tree.len());
        let mut decoded: Option<(BlockId, Vec<Record>)> = None;

        for key in 1..=IndexKey::MAX {
            let Some(block) = tree.search(key) else {
                break;
            };

            let block_records = match decoded.take() {
                Some((cached, cached_records)) if cached == block => cached_records,
                _ => record::decode_block(&self.store.read_block(block)?)?,
            };

            let record = block_records
                .iter()
                .find(|r| r.key == key)
                .cloned()
                .ok_or_else(|| {
                    StorageError::Corrupt(format!(
                        "key {} of '{}' is indexed at block {} but not stored there",
                        key, name, block
                    ))
                })?;
            records.push(record);
            decoded = Some((block, block_records));
        }

        debug!("Exported {} records from '{}'", records.len(), name);
        Ok(records)
    }

    // ========== Delete ==========

    /// Release and zero the data and index blocks of `name`, then drop its FCB
    pub fn delete(&mut self, name: &str) -> StorageResult<()> {
        let fcb = self.require(name)?;

        let data_blocks: BTreeSet<BlockId> = match self.load_index(&fcb) {
            Ok(tree) => tree.entries().map(|(_, block)| block).collect(),
            Err(StorageError::Index(BTreeError::Corrupt(reason))) => {
                warn!(
                    "Index of '{}' is unreadable ({}), releasing {} blocks from block {}",
                    name, reason, fcb.used_blocks, fcb.start_block
                );
                (fcb.start_block..fcb.start_block.saturating_add(fcb.used_blocks)).collect()
            }
            Err(err) => return Err(err),
        };

        for (start, count) in block_runs(data_blocks) {
            self.release_blocks(start, count)?;
        }

        if fcb.has_index() {
            let layout = self.layout();
            let start = layout.block_at(fcb.index_start).ok_or_else(|| {
                StorageError::Corrupt(format!(
                    "index of '{}' starts at {} inside the header",
                    name, fcb.index_start
                ))
            })?;
            let len = usize::try_from(fcb.index_len()).unwrap_or(usize::MAX);
            self.release_blocks(start, layout.blocks_for_len(len))?;
        }

        self.persist_allocator()?;
        self.directory().remove(name)?;
        self.sync_if_configured()?;

        info!("Deleted '{}'", name);
        Ok(())
    }

    fn release_blocks(&mut self, start: BlockId, count: u32) -> StorageResult<()> {
        let total = self.allocator.total_blocks();
        let end = (start as u64 + count as u64).min(total);
        let count = end.saturating_sub(start as u64) as u32;

        self.allocator.release_range(start, count);
        self.store.zero_blocks(start, count)?;
        Ok(())
    }

    // ========== Inspection ==========

    /// FCBs of every stored file, in directory order
    pub fn list(&mut self) -> StorageResult<Vec<Fcb>> {
        Ok(self.directory().list()?)
    }

    pub fn info(&mut self) -> StorageResult<DatabaseInfo> {
        let file_count = self.list()?.len();
        let stats = self.store.cache_stats();
        let block_size = self.superblock.block_size;
        let free_blocks = self.allocator.free_blocks();

        Ok(DatabaseInfo {
            name: self.superblock.name.clone(),
            path: self.path().to_path_buf(),
            total_size: self.superblock.total_size,
            block_size,
            header_size: self.layout().header_size(),
            total_blocks: self.allocator.total_blocks(),
            used_blocks: self.allocator.used_blocks(),
            free_blocks,
            remaining_bytes: free_blocks * block_size as u64,
            created_at: self.superblock.created_at,
            file_count,
            cache_hits: stats.hits,
            cache_misses: stats.misses,
        })
    }

    /// Rendered index tree of `name`
    pub fn index_dump(&mut self, name: &str) -> StorageResult<String> {
        let fcb = self.require(name)?;
        Ok(self.load_index(&fcb)?.render())
    }

    /// Description of one index node of `name` by its node id
    pub fn index_node(&mut self, name: &str, node_id: u32) -> StorageResult<Option<String>> {
        let fcb = self.require(name)?;
        Ok(self.load_index(&fcb)?.describe_node(node_id))
    }

    /// Persist the bitmap and flush the container to disk
    pub fn sync(&mut self) -> StorageResult<()> {
        self.persist_allocator()?;
        self.store.sync()?;
        Ok(())
    }

    fn sync_if_configured(&mut self) -> StorageResult<()> {
        if self.config.sync_on_write {
            self.store.sync()?;
        }
        Ok(())
    }
}

/// Collapse ascending block ids into `(start, count)` runs
fn block_runs(blocks: impl IntoIterator<Item = BlockId>) -> Vec<(BlockId, u32)> {
    let mut runs: Vec<(BlockId, u32)> = Vec::new();
    for block in blocks {
        match runs.last_mut() {
            Some((start, count)) if *start as u64 + *count as u64 == block as u64 => *count += 1,
            _ => runs.push((block, 1)),
        }
    }
    runs
}
