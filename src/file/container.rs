use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::error::{FileError, FileResult};

/// Random-access handle to the single container file
///
/// All offsets are absolute byte positions. Reads and writes never extend the
/// file; growth goes through [`ContainerFile::set_len`] so the logical size
/// recorded in the superblock stays authoritative.
#[derive(Debug)]
pub struct ContainerFile {
    file: File,
    path: PathBuf,
}

impl ContainerFile {
    /// Create a new container file of `size` bytes (zero filled)
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> FileResult<Self> {
        let path = path.as_ref();

        if path.exists() {
            return Err(FileError::FileAlreadyExists(path.display().to_string()));
        }

        // Create parent directories if they don't exist
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;
        file.set_len(size)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing container file for reading and writing
    pub fn open<P: AsRef<Path>>(path: P) -> FileResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FileError::FileNotFound(path.display().to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current physical length of the file in bytes
    pub fn len(&self) -> FileResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    pub fn is_empty(&self) -> FileResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Resize the file; new bytes read as zero
    pub fn set_len(&mut self, size: u64) -> FileResult<()> {
        self.file.set_len(size)?;
        Ok(())
    }

    /// Fill `buffer` from `offset`
    pub fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> FileResult<()> {
        self.check_bounds(offset, buffer.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buffer)?;
        Ok(())
    }

    /// Read `len` bytes from `offset` into a new buffer
    pub fn read_vec(&mut self, offset: u64, len: usize) -> FileResult<Vec<u8>> {
        let mut buffer = vec![0u8; len];
        self.read_at(offset, &mut buffer)?;
        Ok(buffer)
    }

    /// Write `data` at `offset`; the range must already exist
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> FileResult<()> {
        self.check_bounds(offset, data.len())?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Overwrite `len` bytes at `offset` with zeros
    pub fn zero_range(&mut self, offset: u64, len: usize) -> FileResult<()> {
        self.write_at(offset, &vec![0u8; len])
    }

    /// Flush OS buffers to disk
    pub fn sync(&mut self) -> FileResult<()> {
        self.file.sync_data()?;
        Ok(())
    }

    fn check_bounds(&self, offset: u64, len: usize) -> FileResult<()> {
        let file_size = self.len()?;
        let end = offset.checked_add(len as u64);
        match end {
            Some(end) if end <= file_size => Ok(()),
            _ => Err(FileError::OutOfBounds {
                offset,
                len,
                file_size,
            }),
        }
    }
}
