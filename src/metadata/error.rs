use thiserror::Error;

use crate::file::FileError;

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid database name: {0}")]
    InvalidName(String),

    #[error("Bitmap needs {needed} bytes but the header only has room for {capacity}")]
    BitmapOverflow { needed: usize, capacity: usize },

    #[error("Directory needs {needed} bytes but the region only holds {capacity}")]
    DirectoryOverflow { needed: usize, capacity: usize },

    #[error("Cannot grow from {current} to {requested} bytes")]
    InvalidGrowth { current: u64, requested: u64 },

    #[error("Corrupted superblock: {0}")]
    Corrupt(String),
}

pub type MetadataResult<T> = Result<T, MetadataError>;
