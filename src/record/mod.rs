//! Packed text form of records
//!
//! Each record is written as `id:<key>;data:<payload>;` and records are
//! concatenated back to back inside a block. The unused tail of a block is
//! zero filled.

mod error;

pub use error::{RecordError, RecordResult};

use serde::{Deserialize, Serialize};

use crate::btree::IndexKey;

/// Separator that starts every record after the first
const RECORD_SEPARATOR: &str = ";id:";
const KEY_PREFIX: &str = "id:";
const DATA_MARKER: &str = ";data:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: IndexKey,
    pub payload: String,
}

impl Record {
    pub fn new(key: IndexKey, payload: impl Into<String>) -> Self {
        Self {
            key,
            payload: payload.into(),
        }
    }

    /// Packed form of the record
    pub fn encode(&self) -> RecordResult<Vec<u8>> {
        if self.payload.contains(RECORD_SEPARATOR) {
            return Err(RecordError::InvalidPayload {
                key: self.key,
                reason: format!("contains the record separator '{}'", RECORD_SEPARATOR),
            });
        }
        if self.payload.contains('\0') {
            return Err(RecordError::InvalidPayload {
                key: self.key,
                reason: "contains a NUL byte".to_string(),
            });
        }

        Ok(format!("{}{}{}{};", KEY_PREFIX, self.key, DATA_MARKER, self.payload).into_bytes())
    }
}

/// Decode every record packed into a block
pub fn decode_block(block: &[u8]) -> RecordResult<Vec<Record>> {
    let end = block.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&block[..end])
        .map_err(|e| RecordError::Corrupt(format!("block is not UTF-8: {}", e)))?;

    if text.is_empty() {
        return Ok(Vec::new());
    }

    let body = text
        .strip_suffix(';')
        .ok_or_else(|| RecordError::Corrupt("block does not end with ';'".to_string()))?;
    let body = body
        .strip_prefix(KEY_PREFIX)
        .ok_or_else(|| RecordError::Corrupt(format!("block does not start with '{}'", KEY_PREFIX)))?;

    body.split(RECORD_SEPARATOR).map(decode_fields).collect()
}

/// Decode `<key>;data:<payload>`
fn decode_fields(fields: &str) -> RecordResult<Record> {
    let (key, payload) = fields
        .split_once(DATA_MARKER)
        .ok_or_else(|| RecordError::Corrupt(format!("record '{}' has no data field", fields)))?;

    let key = key
        .parse::<IndexKey>()
        .map_err(|_| RecordError::Corrupt(format!("invalid record key '{}'", key)))?;

    Ok(Record::new(key, payload))
}

/// Find the record for `key` within a block
pub fn find_in_block(block: &[u8], key: IndexKey) -> RecordResult<Option<Record>> {
    Ok(decode_block(block)?.into_iter().find(|r| r.key == key))
}
