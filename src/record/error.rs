use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("Invalid payload for key {key}: {reason}")]
    InvalidPayload { key: i32, reason: String },

    #[error("Corrupted block data: {0}")]
    Corrupt(String),
}

pub type RecordResult<T> = Result<T, RecordError>;
