//! File control blocks and the directory stored in the superblock

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::file::{BlockId, ContainerFile};
use crate::metadata::{FCB_LIST_SIZE, MetadataError, Superblock};

#[derive(Debug, Error)]
pub enum FcbError {
    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Directory needs {needed} bytes but only {capacity} are reserved")]
    CapacityExceeded { needed: usize, capacity: usize },

    #[error("Corrupted directory: {0}")]
    Corrupt(String),

    #[error("Invalid file name: {0}")]
    InvalidName(String),
}

pub type FcbResult<T> = Result<T, FcbError>;

/// Fixed part of an encoded FCB after the name
const FIXED_FIELDS_SIZE: usize = 4 + 4 + 4 + 8 + 8 + 8;

/// Descriptor of one imported file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fcb {
    pub name: String,
    /// First data block
    pub start_block: BlockId,
    pub used_blocks: u32,
    /// Bytes of packed record data
    pub file_size: u32,
    pub created_at: DateTime<Utc>,
    /// Absolute byte range of the serialized index
    pub index_start: u64,
    pub index_end: u64,
}

impl Fcb {
    /// Fresh descriptor with zero sizes and no index yet
    pub fn new(name: &str, start_block: BlockId, created_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            start_block,
            used_blocks: 0,
            file_size: 0,
            created_at,
            index_start: 0,
            index_end: 0,
        }
    }

    /// Serialized index length in bytes
    pub fn index_len(&self) -> u64 {
        self.index_end.saturating_sub(self.index_start)
    }

    pub fn has_index(&self) -> bool {
        self.index_end > self.index_start
    }

    /// Length of [`Fcb::to_bytes`] without building it
    pub fn encoded_len(&self) -> usize {
        4 + self.name.len() + FIXED_FIELDS_SIZE
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&(self.name.len() as u32).to_be_bytes());
        buf.extend_from_slice(self.name.as_bytes());
        buf.extend_from_slice(&self.start_block.to_be_bytes());
        buf.extend_from_slice(&self.used_blocks.to_be_bytes());
        buf.extend_from_slice(&self.file_size.to_be_bytes());
        buf.extend_from_slice(&self.index_start.to_be_bytes());
        buf.extend_from_slice(&self.index_end.to_be_bytes());
        buf.extend_from_slice(&self.created_at.timestamp_millis().to_be_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> FcbResult<Self> {
        let mut cursor = Cursor::new(bytes);

        let name_len = cursor.read_u32()? as usize;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| FcbError::Corrupt("file name is not UTF-8".to_string()))?
            .to_string();
        let start_block = cursor.read_u32()?;
        let used_blocks = cursor.read_u32()?;
        let file_size = cursor.read_u32()?;
        let index_start = cursor.read_u64()?;
        let index_end = cursor.read_u64()?;
        let millis = cursor.read_u64()? as i64;

        if cursor.remaining() > 0 {
            return Err(FcbError::Corrupt(format!(
                "{} trailing bytes in record for '{}'",
                cursor.remaining(),
                name
            )));
        }
        if index_end < index_start {
            return Err(FcbError::Corrupt(format!(
                "index range {}..{} of '{}' is reversed",
                index_start, index_end, name
            )));
        }

        let created_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| FcbError::Corrupt(format!("invalid timestamp {}", millis)))?;

        Ok(Self {
            name,
            start_block,
            used_blocks,
            file_size,
            created_at,
            index_start,
            index_end,
        })
    }
}

/// Encode a directory: count, then each FCB prefixed by its length
pub fn encode_directory(fcbs: &[Fcb]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(directory_len(fcbs));
    buf.extend_from_slice(&(fcbs.len() as u32).to_be_bytes());
    for fcb in fcbs {
        let bytes = fcb.to_bytes();
        buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        buf.extend_from_slice(&bytes);
    }
    buf
}

/// Decode a directory region; bytes after the last record are ignored
pub fn decode_directory(bytes: &[u8]) -> FcbResult<Vec<Fcb>> {
    let mut cursor = Cursor::new(bytes);
    let count = cursor.read_u32()? as usize;

    let mut fcbs = Vec::new();
    for _ in 0..count {
        let len = cursor.read_u32()? as usize;
        fcbs.push(Fcb::from_bytes(cursor.take(len)?)?);
    }
    Ok(fcbs)
}

/// Encoded size of a directory holding `fcbs`
pub fn directory_len(fcbs: &[Fcb]) -> usize {
    4 + fcbs.iter().map(|f| 4 + f.encoded_len()).sum::<usize>()
}

/// Names must be non-empty and free of control characters
pub fn validate_name(name: &str) -> FcbResult<()> {
    if name.trim().is_empty() {
        return Err(FcbError::InvalidName("name is empty".to_string()));
    }
    if name.chars().any(char::is_control) {
        return Err(FcbError::InvalidName(format!(
            "'{}' contains control characters",
            name.escape_default()
        )));
    }
    // A single entry must fit the region on its own
    let single = 4 + 4 + 4 + name.len() + FIXED_FIELDS_SIZE;
    if single > FCB_LIST_SIZE {
        return Err(FcbError::InvalidName(format!(
            "'{}' is too long for the directory",
            name
        )));
    }
    Ok(())
}

/// Directory view over the container's reserved FCB region
pub struct FcbDirectory<'a> {
    file: &'a mut ContainerFile,
}

impl<'a> FcbDirectory<'a> {
    pub fn new(file: &'a mut ContainerFile) -> Self {
        Self { file }
    }

    pub fn list(&mut self) -> FcbResult<Vec<Fcb>> {
        let region = Superblock::read_directory(self.file)?;
        decode_directory(&region)
    }

    pub fn find_by_name(&mut self, name: &str) -> FcbResult<Option<Fcb>> {
        Ok(self.list()?.into_iter().find(|fcb| fcb.name == name))
    }

    /// Replace the FCB with the same name or append it
    pub fn upsert(&mut self, fcb: &Fcb) -> FcbResult<()> {
        let mut fcbs = self.list()?;
        match fcbs.iter_mut().find(|existing| existing.name == fcb.name) {
            Some(existing) => *existing = fcb.clone(),
            None => fcbs.push(fcb.clone()),
        }

        self.write(&fcbs)?;
        debug!("Stored FCB '{}' ({} entries)", fcb.name, fcbs.len());
        Ok(())
    }

    /// Drop the FCB named `name`; returns whether it existed
    pub fn remove(&mut self, name: &str) -> FcbResult<bool> {
        let mut fcbs = self.list()?;
        let before = fcbs.len();
        fcbs.retain(|fcb| fcb.name != name);

        if fcbs.len() == before {
            return Ok(false);
        }

        self.write(&fcbs)?;
        debug!("Removed FCB '{}' ({} entries left)", name, fcbs.len());
        Ok(true)
    }

    fn write(&mut self, fcbs: &[Fcb]) -> FcbResult<()> {
        let needed = directory_len(fcbs);
        if needed > FCB_LIST_SIZE {
            return Err(FcbError::CapacityExceeded {
                needed,
                capacity: FCB_LIST_SIZE,
            });
        }

        Superblock::write_directory(self.file, &encode_directory(fcbs))?;
        Ok(())
    }
}

/// Bounds-checked big-endian reader over a directory buffer
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> FcbResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| {
                FcbError::Corrupt(format!(
                    "truncated: needed {} bytes at offset {} of {}",
                    len,
                    self.pos,
                    self.buf.len()
                ))
            })?;

        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> FcbResult<u32> {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(self.take(4)?);
        Ok(u32::from_be_bytes(bytes))
    }

    fn read_u64(&mut self) -> FcbResult<u64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.take(8)?);
        Ok(u64::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    const SIZE: u64 = 4096 + 16 * 256;

    fn setup() -> (TempDir, ContainerFile) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut file = ContainerFile::create(temp_dir.path().join("fcb.pfs"), SIZE).unwrap();
        Superblock::initialize(&mut file, "fcb", SIZE, 256, Utc::now()).unwrap();
        (temp_dir, file)
    }

    fn fcb(name: &str, start_block: BlockId) -> Fcb {
        let created = Utc.with_ymd_and_hms(2024, 5, 17, 8, 0, 0).unwrap();
        Fcb {
            used_blocks: 3,
            file_size: 612,
            index_start: 4096 + 3 * 256,
            index_end: 4096 + 3 * 256 + 40,
            ..Fcb::new(name, start_block, created)
        }
    }

    #[test]
    fn test_fcb_bytes_roundtrip() {
        let original = fcb("movies", 7);
        let bytes = original.to_bytes();

        assert_eq!(bytes.len(), original.encoded_len());
        assert_eq!(&bytes[..4], &[0, 0, 0, 6]);
        assert_eq!(&bytes[4..10], b"movies");
        assert_eq!(Fcb::from_bytes(&bytes).unwrap(), original);
    }

    #[test]
    fn test_fcb_rejects_truncated_and_trailing() {
        let bytes = fcb("movies", 7).to_bytes();

        assert!(matches!(
            Fcb::from_bytes(&bytes[..bytes.len() - 1]),
            Err(FcbError::Corrupt(_))
        ));

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(Fcb::from_bytes(&longer), Err(FcbError::Corrupt(_))));
    }

    #[test]
    fn test_empty_region_decodes_as_empty_directory() {
        let (_temp, mut file) = setup();
        let mut directory = FcbDirectory::new(&mut file);

        assert!(directory.list().unwrap().is_empty());
        assert_eq!(directory.find_by_name("movies").unwrap(), None);
    }

    #[test]
    fn test_upsert_appends_and_replaces() {
        let (_temp, mut file) = setup();
        let mut directory = FcbDirectory::new(&mut file);

        directory.upsert(&fcb("a", 0)).unwrap();
        directory.upsert(&fcb("b", 5)).unwrap();

        let mut updated = fcb("a", 0);
        updated.used_blocks = 9;
        directory.upsert(&updated).unwrap();

        let list = directory.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], updated);
        assert_eq!(list[1].name, "b");
        assert_eq!(directory.find_by_name("b").unwrap().unwrap().start_block, 5);
    }

    #[test]
    fn test_remove() {
        let (_temp, mut file) = setup();
        let mut directory = FcbDirectory::new(&mut file);

        directory.upsert(&fcb("a", 0)).unwrap();
        directory.upsert(&fcb("b", 5)).unwrap();

        assert!(directory.remove("a").unwrap());
        assert!(!directory.remove("a").unwrap());
        assert!(!directory.remove("missing").unwrap());

        let names: Vec<_> = directory.list().unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b"]);
    }

    #[test]
    fn test_region_tail_is_zeroed_after_shrink() {
        let (_temp, mut file) = setup();

        {
            let mut directory = FcbDirectory::new(&mut file);
            directory.upsert(&fcb("first", 0)).unwrap();
            directory.upsert(&fcb("second", 1)).unwrap();
            directory.remove("second").unwrap();
        }

        let region = Superblock::read_directory(&mut file).unwrap();
        let used = directory_len(&[fcb("first", 0)]);
        assert!(region[used..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_capacity_exceeded() {
        let (_temp, mut file) = setup();
        let mut directory = FcbDirectory::new(&mut file);

        // 4 + 3 * (44 + 10) = 166 bytes fit in 204; a fourth entry does not
        for name in ["file_00001", "file_00002", "file_00003"] {
            directory.upsert(&fcb(name, 0)).unwrap();
        }
        let result = directory.upsert(&fcb("file_00004", 0));

        assert!(matches!(
            result,
            Err(FcbError::CapacityExceeded {
                needed: 220,
                capacity: 204
            })
        ));
        assert_eq!(directory.list().unwrap().len(), 3);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("movies").is_ok());
        assert!(matches!(validate_name(""), Err(FcbError::InvalidName(_))));
        assert!(matches!(validate_name("a\nb"), Err(FcbError::InvalidName(_))));
        assert!(matches!(
            validate_name(&"x".repeat(FCB_LIST_SIZE)),
            Err(FcbError::InvalidName(_))
        ));
    }

    #[test]
    fn test_corrupt_count() {
        let (_temp, mut file) = setup();
        Superblock::write_directory(&mut file, &[0, 0, 0, 9]).unwrap();

        let mut directory = FcbDirectory::new(&mut file);
        assert!(matches!(directory.list(), Err(FcbError::Corrupt(_))));
    }
}
