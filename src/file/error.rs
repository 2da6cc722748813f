use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already exists: {0}")]
    FileAlreadyExists(String),

    #[error("Access out of bounds: offset={offset}, len={len}, file size={file_size}")]
    OutOfBounds {
        offset: u64,
        len: usize,
        file_size: u64,
    },

    #[error("Invalid block size: expected at most {expected}, got {actual}")]
    InvalidBlockSize { expected: usize, actual: usize },
}

pub type FileResult<T> = Result<T, FileError>;
