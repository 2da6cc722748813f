use std::io;
use thiserror::Error;

use crate::btree::{BTreeError, IndexKey};
use crate::config::ConfigError;
use crate::fcb::FcbError;
use crate::file::FileError;
use crate::metadata::MetadataError;
use crate::record::RecordError;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File {0} already exists")]
    AlreadyExists(String),

    #[error("File {0} not found")]
    NotFound(String),

    #[error("Key {key} not found in {name}")]
    KeyNotFound { name: String, key: IndexKey },

    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    #[error("Corrupted container: {0}")]
    Corrupt(String),

    #[error("Record {key} is {size} bytes, larger than a {block_size}-byte block")]
    RecordTooLarge {
        key: IndexKey,
        size: usize,
        block_size: usize,
    },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Duplicate key {key} in {name}")]
    DuplicateKey { name: String, key: IndexKey },

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Metadata error: {0}")]
    Metadata(#[source] MetadataError),

    #[error("Index error: {0}")]
    Index(#[from] BTreeError),

    #[error("Directory error: {0}")]
    Directory(#[source] FcbError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<MetadataError> for StorageError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::BitmapOverflow { needed, capacity } => {
                StorageError::CapacityExceeded(format!(
                    "bitmap needs {} bytes but the header holds {}",
                    needed, capacity
                ))
            }
            MetadataError::DirectoryOverflow { needed, capacity } => {
                StorageError::CapacityExceeded(format!(
                    "directory needs {} bytes but the region holds {}",
                    needed, capacity
                ))
            }
            MetadataError::InvalidName(reason) => StorageError::InvalidName(reason),
            MetadataError::Corrupt(reason) => StorageError::Corrupt(reason),
            MetadataError::File(err) => StorageError::File(err),
            err @ MetadataError::InvalidGrowth { .. } => StorageError::Metadata(err),
        }
    }
}

impl From<FcbError> for StorageError {
    fn from(err: FcbError) -> Self {
        match err {
            FcbError::CapacityExceeded { needed, capacity } => {
                StorageError::CapacityExceeded(format!(
                    "directory needs {} bytes but the region holds {}",
                    needed, capacity
                ))
            }
            FcbError::InvalidName(reason) => StorageError::InvalidName(reason),
            FcbError::Metadata(err) => err.into(),
            err @ FcbError::Corrupt(_) => StorageError::Directory(err),
        }
    }
}

impl From<RecordError> for StorageError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::InvalidPayload { .. } => StorageError::InvalidRecord(err.to_string()),
            RecordError::Corrupt(reason) => StorageError::Corrupt(reason),
        }
    }
}
