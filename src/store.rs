//! Backing store trait for block devices
//!
//! The emulated devices only validate geometry and decode commands. Reading
//! and writing the actual medium (an image file, memory, a network share) is
//! up to an implementation of [`BlockStore`].

use crate::error::{ScsiError, ScsiResult};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Block storage behind an emulated device
pub trait BlockStore: Send {
    /// Read blocks from the medium
    ///
    /// # Arguments
    /// * `lba` - Logical block address to start reading from
    /// * `blocks` - Number of blocks to read
    /// * `block_size` - Size of each block in bytes
    ///
    /// # Returns
    /// Vector containing the requested data (length = blocks * block_size)
    fn read(&self, lba: u64, blocks: u32, block_size: u32) -> ScsiResult<Vec<u8>>;

    /// Write blocks to the medium
    ///
    /// # Arguments
    /// * `lba` - Logical block address to start writing to
    /// * `data` - Data to write (length must be multiple of block_size)
    /// * `block_size` - Size of each block in bytes
    fn write(&mut self, lba: u64, data: &[u8], block_size: u32) -> ScsiResult<()>;

    /// Total size of the medium in bytes
    fn capacity(&self) -> u64;

    /// Flush any pending writes to stable storage
    fn flush(&mut self) -> ScsiResult<()> {
        Ok(())
    }

    fn is_read_only(&self) -> bool {
        false
    }
}

/// Memory-backed medium
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Vec<u8>,
    read_only: bool,
}

impl MemoryStore {
    pub fn new(size_bytes: usize) -> Self {
        Self {
            data: vec![0u8; size_bytes],
            read_only: false,
        }
    }

    /// Wrap existing image contents
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self {
            data,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, lba: u64, len: usize, block_size: u32) -> ScsiResult<std::ops::Range<usize>> {
        let offset = lba
            .checked_mul(u64::from(block_size))
            .and_then(|o| usize::try_from(o).ok())
            .ok_or_else(|| ScsiError::Storage(format!("LBA {} out of addressable range", lba)))?;

        if offset + len > self.data.len() {
            return Err(ScsiError::Storage(format!(
                "access beyond medium: LBA {}, {} bytes",
                lba, len
            )));
        }

        Ok(offset..offset + len)
    }
}

impl BlockStore for MemoryStore {
    fn read(&self, lba: u64, blocks: u32, block_size: u32) -> ScsiResult<Vec<u8>> {
        let len = blocks as usize * block_size as usize;
        let range = self.range(lba, len, block_size)?;
        Ok(self.data[range].to_vec())
    }

    fn write(&mut self, lba: u64, data: &[u8], block_size: u32) -> ScsiResult<()> {
        if self.read_only {
            return Err(ScsiError::Storage("medium is read-only".into()));
        }
        let range = self.range(lba, data.len(), block_size)?;
        self.data[range].copy_from_slice(data);
        Ok(())
    }

    fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Medium backed by an image file
#[derive(Debug)]
pub struct FileStore {
    file: File,
    capacity: u64,
    read_only: bool,
}

impl FileStore {
    /// Open an existing image; read-only images are opened without write access
    pub fn open(path: &Path, read_only: bool) -> ScsiResult<Self> {
        let file = OpenOptions::new().read(true).write(!read_only).open(path)?;
        let capacity = file.metadata()?.len();
        log::debug!("Opened image {} ({} bytes)", path.display(), capacity);
        Ok(FileStore {
            file,
            capacity,
            read_only,
        })
    }

    fn seek_to(&self, lba: u64, len: usize, block_size: u32) -> ScsiResult<()> {
        let offset = lba
            .checked_mul(u64::from(block_size))
            .filter(|o| o + len as u64 <= self.capacity)
            .ok_or_else(|| {
                ScsiError::Storage(format!("access beyond image: LBA {}, {} bytes", lba, len))
            })?;
        (&self.file)
            .seek(SeekFrom::Start(offset))
            .map_err(|e| ScsiError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl BlockStore for FileStore {
    fn read(&self, lba: u64, blocks: u32, block_size: u32) -> ScsiResult<Vec<u8>> {
        let mut data = vec![0u8; blocks as usize * block_size as usize];
        self.seek_to(lba, data.len(), block_size)?;
        (&self.file)
            .read_exact(&mut data)
            .map_err(|e| ScsiError::Storage(e.to_string()))?;
        Ok(data)
    }

    fn write(&mut self, lba: u64, data: &[u8], block_size: u32) -> ScsiResult<()> {
        if self.read_only {
            return Err(ScsiError::Storage("image is read-only".into()));
        }
        self.seek_to(lba, data.len(), block_size)?;
        self.file
            .write_all(data)
            .map_err(|e| ScsiError::Storage(e.to_string()))
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn flush(&mut self) -> ScsiResult<()> {
        if self.read_only {
            return Ok(());
        }
        self.file
            .sync_data()
            .map_err(|e| ScsiError::Storage(e.to_string()))
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let mut store = MemoryStore::new(4096);
        store.write(2, &[0xAB; 512], 512).unwrap();
        let data = store.read(2, 1, 512).unwrap();
        assert_eq!(data, vec![0xAB; 512]);
        assert_eq!(store.read(0, 1, 512).unwrap(), vec![0; 512]);
    }

    #[test]
    fn test_out_of_range() {
        let store = MemoryStore::new(1024);
        assert!(matches!(store.read(2, 1, 512), Err(ScsiError::Storage(_))));
    }

    #[test]
    fn test_read_only() {
        let mut store = MemoryStore::new(1024).read_only();
        assert!(store.is_read_only());
        assert!(store.write(0, &[0; 512], 512).is_err());
    }

    #[test]
    fn test_file_store() {
        let path = std::env::temp_dir().join(format!("scsi-emulator-{}.hds", std::process::id()));
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let mut store = FileStore::open(&path, false).unwrap();
        assert_eq!(store.capacity(), 4096);
        store.write(3, &[0x5A; 512], 512).unwrap();
        store.flush().unwrap();
        assert_eq!(store.read(3, 1, 512).unwrap(), vec![0x5A; 512]);
        assert!(matches!(store.read(8, 1, 512), Err(ScsiError::Storage(_))));

        let mut ro = FileStore::open(&path, true).unwrap();
        assert!(ro.write(0, &[0; 512], 512).is_err());

        std::fs::remove_file(&path).unwrap();
    }
}
