//! Append-only pack files used by the compacting store.

use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An append-only file holding concatenated blobs.
///
/// Blobs are addressed by `(offset, len)`; the pack itself records no
/// framing. The owner keeps the location map.
///
/// # Durability
///
/// `append` writes through to the OS; `sync` calls `File::sync_all()`.
#[derive(Debug)]
pub struct PackFile {
    path: PathBuf,
    file: RwLock<File>,
    size: RwLock<u64>,
}

impl PackFile {
    /// Opens or creates a pack file at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            size: RwLock::new(size),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        *self.size.read()
    }

    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range extends beyond
    /// the file, or an I/O error.
    pub fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let size = *self.size.read();
        let end = offset.saturating_add(len as u64);

        if offset > size || end > size {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;

        Ok(buffer)
    }

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    pub fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut file = self.file.write();
        let mut size = self.size.write();

        let offset = *size;
        if data.is_empty() {
            return Ok(offset);
        }

        file.seek(SeekFrom::End(0))?;
        file.write_all(data)?;
        *size += data.len() as u64;

        Ok(offset)
    }

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_new_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pack-000001.dat");

        let pack = PackFile::open(&path).unwrap();
        assert_eq!(pack.size(), 0);
        assert!(path.exists());
        assert_eq!(pack.path(), path);
    }

    #[test]
    fn append_returns_offsets() {
        let dir = tempdir().unwrap();
        let mut pack = PackFile::open(&dir.path().join("p.dat")).unwrap();

        assert_eq!(pack.append(b"hello").unwrap(), 0);
        assert_eq!(pack.append(b" world").unwrap(), 5);
        assert_eq!(pack.size(), 11);
        assert_eq!(pack.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut pack = PackFile::open(&dir.path().join("p.dat")).unwrap();
        pack.append(b"hello").unwrap();

        let result = pack.read_at(3, 10);
        assert!(matches!(result, Err(StorageError::ReadPastEnd { .. })));
    }

    #[test]
    fn empty_blobs() {
        let dir = tempdir().unwrap();
        let mut pack = PackFile::open(&dir.path().join("p.dat")).unwrap();
        pack.append(b"x").unwrap();

        assert_eq!(pack.append(b"").unwrap(), 1);
        assert!(pack.read_at(1, 0).unwrap().is_empty());
    }

    #[test]
    fn persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.dat");
        {
            let mut pack = PackFile::open(&path).unwrap();
            pack.append(b"persistent data").unwrap();
            pack.sync().unwrap();
        }

        let pack = PackFile::open(&path).unwrap();
        assert_eq!(pack.size(), 15);
        assert_eq!(pack.read_at(0, 15).unwrap(), b"persistent data");
    }
}
