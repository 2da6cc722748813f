use thiserror::Error;

use super::IndexKey;

/// Errors that can occur during tree index operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BTreeError {
    #[error("Duplicate key: {0}")]
    DuplicateKey(IndexKey),

    #[error("Corrupted index: {0}")]
    Corrupt(String),

    #[error("Invalid tree state: {0}")]
    InvalidState(String),
}

pub type BTreeResult<T> = Result<T, BTreeError>;
