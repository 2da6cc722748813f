use chrono::{DateTime, Utc};
use tracing::debug;

use super::error::{MetadataError, MetadataResult};
use super::{
    BITMAP_OFFSET, BLOCK_SIZE_OFFSET, CREATE_DATE_OFFSET, DATABASE_NAME_OFFSET,
    DATABASE_NAME_SIZE, FCB_LIST_OFFSET, FCB_LIST_SIZE, Layout, TOTAL_BLOCKS_OFFSET,
    TOTAL_SIZE_OFFSET, bitmap_len,
};
use crate::file::ContainerFile;

/// Bytes covering every fixed superblock field
const FIELDS_SIZE: usize = FCB_LIST_OFFSET as usize;

/// Decoded superblock fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub name: String,
    /// Logical container size in bytes, header included
    pub total_size: u64,
    pub total_blocks: u64,
    pub created_at: DateTime<Utc>,
    pub block_size: u32,
}

impl Superblock {
    /// Write a fresh superblock into a newly created container
    ///
    /// The directory region and bitmap are zeroed, which decodes as an empty
    /// directory and an all-free bitmap.
    pub fn initialize(
        file: &mut ContainerFile,
        name: &str,
        total_size: u64,
        block_size: u32,
        created_at: DateTime<Utc>,
    ) -> MetadataResult<Self> {
        validate_name(name)?;

        let layout = Layout::new(block_size);
        let total_blocks = layout.blocks_for_size(total_size);
        if total_blocks > layout.max_blocks() {
            return Err(MetadataError::BitmapOverflow {
                needed: bitmap_len(total_blocks),
                capacity: layout.bitmap_capacity(),
            });
        }

        let superblock = Self {
            name: name.to_string(),
            total_size,
            total_blocks,
            created_at: truncate_to_millis(created_at)?,
            block_size,
        };

        let mut fields = vec![0u8; FIELDS_SIZE];
        let offset = DATABASE_NAME_OFFSET as usize;
        fields[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        put(&mut fields, TOTAL_SIZE_OFFSET, &total_size.to_be_bytes());
        put(&mut fields, TOTAL_BLOCKS_OFFSET, &total_blocks.to_be_bytes());
        put(
            &mut fields,
            CREATE_DATE_OFFSET,
            &superblock.created_at.timestamp_millis().to_be_bytes(),
        );
        put(&mut fields, BLOCK_SIZE_OFFSET, &block_size.to_be_bytes());

        file.write_at(0, &fields)?;
        file.zero_range(FCB_LIST_OFFSET, FCB_LIST_SIZE)?;
        file.zero_range(BITMAP_OFFSET, layout.bitmap_capacity())?;

        debug!(
            "Initialized superblock '{}' ({} bytes, {} blocks of {})",
            name, total_size, total_blocks, block_size
        );

        Ok(superblock)
    }

    /// Read and validate the superblock of an existing container
    pub fn read(file: &mut ContainerFile) -> MetadataResult<Self> {
        let physical_len = file.len()?;
        if physical_len < FIELDS_SIZE as u64 {
            return Err(MetadataError::Corrupt(format!(
                "file is {} bytes, smaller than the superblock",
                physical_len
            )));
        }

        let fields = file.read_vec(0, FIELDS_SIZE)?;

        let name_start = DATABASE_NAME_OFFSET as usize;
        let raw_name = &fields[name_start..name_start + DATABASE_NAME_SIZE];
        let name = std::str::from_utf8(raw_name)
            .map_err(|_| MetadataError::Corrupt("database name is not UTF-8".to_string()))?
            .trim_end_matches('\0')
            .to_string();

        let total_size = be_u64(&fields, TOTAL_SIZE_OFFSET);
        let total_blocks = be_u64(&fields, TOTAL_BLOCKS_OFFSET);
        let millis = be_u64(&fields, CREATE_DATE_OFFSET) as i64;
        let block_size = be_u32(&fields, BLOCK_SIZE_OFFSET);

        if block_size == 0 {
            return Err(MetadataError::Corrupt("block size is zero".to_string()));
        }

        let layout = Layout::new(block_size);
        if total_blocks != layout.blocks_for_size(total_size) {
            return Err(MetadataError::Corrupt(format!(
                "block count {} does not match size {} with {}-byte blocks",
                total_blocks, total_size, block_size
            )));
        }
        if total_blocks > layout.max_blocks() {
            return Err(MetadataError::Corrupt(format!(
                "block count {} exceeds bitmap capacity {}",
                total_blocks,
                layout.max_blocks()
            )));
        }
        if physical_len < total_size {
            return Err(MetadataError::Corrupt(format!(
                "file is {} bytes but the superblock records {}",
                physical_len, total_size
            )));
        }

        let created_at = DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            MetadataError::Corrupt(format!("invalid creation timestamp {}", millis))
        })?;

        Ok(Self {
            name,
            total_size,
            total_blocks,
            created_at,
            block_size,
        })
    }

    pub fn layout(&self) -> Layout {
        Layout::new(self.block_size)
    }

    /// Record a new logical size and the block count derived from it
    pub fn write_total_size(
        &mut self,
        file: &mut ContainerFile,
        total_size: u64,
    ) -> MetadataResult<()> {
        file.write_at(TOTAL_SIZE_OFFSET, &total_size.to_be_bytes())?;
        self.total_size = total_size;
        self.write_total_blocks(file, self.layout().blocks_for_size(total_size))
    }

    pub fn write_total_blocks(
        &mut self,
        file: &mut ContainerFile,
        total_blocks: u64,
    ) -> MetadataResult<()> {
        file.write_at(TOTAL_BLOCKS_OFFSET, &total_blocks.to_be_bytes())?;
        self.total_blocks = total_blocks;
        Ok(())
    }

    /// Read the allocation bitmap sized for the current block count
    pub fn read_bitmap(&self, file: &mut ContainerFile) -> MetadataResult<Vec<u8>> {
        let len = bitmap_len(self.total_blocks);
        self.check_bitmap_len(len)?;
        Ok(file.read_vec(BITMAP_OFFSET, len)?)
    }

    pub fn write_bitmap(&self, file: &mut ContainerFile, bitmap: &[u8]) -> MetadataResult<()> {
        self.check_bitmap_len(bitmap.len())?;
        file.write_at(BITMAP_OFFSET, bitmap)?;
        Ok(())
    }

    /// Raw bytes of the FCB directory region
    pub fn read_directory(file: &mut ContainerFile) -> MetadataResult<Vec<u8>> {
        Ok(file.read_vec(FCB_LIST_OFFSET, FCB_LIST_SIZE)?)
    }

    /// Overwrite the FCB directory region, zero filling the unused tail
    pub fn write_directory(file: &mut ContainerFile, data: &[u8]) -> MetadataResult<()> {
        if data.len() > FCB_LIST_SIZE {
            return Err(MetadataError::DirectoryOverflow {
                needed: data.len(),
                capacity: FCB_LIST_SIZE,
            });
        }

        let mut region = vec![0u8; FCB_LIST_SIZE];
        region[..data.len()].copy_from_slice(data);
        file.write_at(FCB_LIST_OFFSET, &region)?;
        Ok(())
    }

    fn check_bitmap_len(&self, len: usize) -> MetadataResult<()> {
        let capacity = self.layout().bitmap_capacity();
        if len > capacity {
            return Err(MetadataError::BitmapOverflow {
                needed: len,
                capacity,
            });
        }
        Ok(())
    }
}

/// Names are stored in a fixed 20-byte field
pub fn validate_name(name: &str) -> MetadataResult<()> {
    if name.trim().is_empty() {
        return Err(MetadataError::InvalidName("name is empty".to_string()));
    }
    if name.len() > DATABASE_NAME_SIZE {
        return Err(MetadataError::InvalidName(format!(
            "'{}' is longer than {} bytes",
            name, DATABASE_NAME_SIZE
        )));
    }
    if name.trim() != name {
        return Err(MetadataError::InvalidName(format!(
            "'{}' has leading or trailing whitespace",
            name
        )));
    }
    if name.contains('\0') {
        return Err(MetadataError::InvalidName(format!(
            "'{}' contains a NUL byte",
            name.escape_default()
        )));
    }
    Ok(())
}

fn truncate_to_millis(timestamp: DateTime<Utc>) -> MetadataResult<DateTime<Utc>> {
    let millis = timestamp.timestamp_millis();
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| MetadataError::Corrupt(format!("invalid creation timestamp {}", millis)))
}

fn put(buf: &mut [u8], offset: u64, bytes: &[u8]) {
    let offset = offset as usize;
    buf[offset..offset + bytes.len()].copy_from_slice(bytes);
}

fn be_u64(buf: &[u8], offset: u64) -> u64 {
    let offset = offset as usize;
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

fn be_u32(buf: &[u8], offset: u64) -> u32 {
    let offset = offset as usize;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}
