//! Blob store packing many small blobs into a few append-only files.
//!
//! ## Layout
//!
//! ```text
//! <dir>/
//! ├─ MAP                # key -> (pack, offset, len)
//! ├─ pack-000001.dat
//! └─ pack-000002.dat
//! ```
//!
//! Writes append to the current pack. Once the current pack has taken
//! `fan_out` blobs a new pack is started. Packs cannot be truncated in
//! place, so deleting a key copies every surviving blob of its pack into
//! a freshly started pack and removes the old file.
//!
//! ## MAP format
//!
//! ```text
//! magic "SBMP" | version u16 | current u32 | next u32 | count u32
//! count × (key_len u16 | key | pack u32 | offset u64 | len u64)
//! ```
//! All integers are little-endian.

use crate::blob::{validate_key, BlobStore};
use crate::error::{StorageError, StorageResult};
use crate::pack::PackFile;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default number of blobs appended to a pack before a new one is started.
pub const DEFAULT_FAN_OUT: usize = 10;

const MAP_FILE: &str = "MAP";
const MAP_TEMP: &str = ".MAP.tmp";
const MAP_MAGIC: [u8; 4] = *b"SBMP";
const MAP_VERSION: u16 = 1;
/// Upper bound on entries preallocated from an untrusted MAP count.
const MAP_PREALLOC: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Location {
    pack: u32,
    offset: u64,
    len: u64,
}

/// A blob store that packs blobs into a bounded number of files.
///
/// Trades delete cost (sibling blobs are rewritten) for fewer files and
/// better locality than [`super::FileBlobStore`].
#[derive(Debug)]
pub struct CompactingBlobStore {
    dir: PathBuf,
    fan_out: usize,
    entries: HashMap<String, Location>,
    live: BTreeMap<u32, BTreeSet<String>>,
    packs: BTreeMap<u32, PackFile>,
    current: u32,
    appended: usize,
    next_pack: u32,
}

impl CompactingBlobStore {
    /// Opens a store rooted at `dir` with the default fan-out.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the map is
    /// corrupted.
    pub fn open(dir: &Path) -> StorageResult<Self> {
        Self::open_with_fan_out(dir, DEFAULT_FAN_OUT)
    }

    /// Opens a store rooted at `dir` starting a new pack every `fan_out` blobs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the map is
    /// corrupted.
    pub fn open_with_fan_out(dir: &Path, fan_out: usize) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let map_path = dir.join(MAP_FILE);
        let (current, next_pack, entries) = if map_path.exists() {
            decode_map(&fs::read(&map_path)?)?
        } else {
            (1, 2, HashMap::new())
        };

        let mut live: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for (key, loc) in &entries {
            live.entry(loc.pack).or_default().insert(key.clone());
        }

        let mut packs = BTreeMap::new();
        for &id in live.keys().chain(std::iter::once(&current)) {
            if !packs.contains_key(&id) {
                packs.insert(id, PackFile::open(&pack_path(dir, id))?);
            }
        }

        let appended = live.get(&current).map_or(0, BTreeSet::len);

        Ok(Self {
            dir: dir.to_path_buf(),
            fan_out: fan_out.max(1),
            entries,
            live,
            packs,
            current,
            appended,
            next_pack,
        })
    }

    /// Returns the number of pack files currently in use.
    #[must_use]
    pub fn pack_count(&self) -> usize {
        self.packs.len()
    }

    /// Returns the directory holding the packs.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn start_pack(&mut self) -> StorageResult<()> {
        let id = self.next_pack;
        self.next_pack += 1;
        self.packs.insert(id, PackFile::open(&pack_path(&self.dir, id))?);
        self.current = id;
        self.appended = 0;
        debug!(pack = id, dir = %self.dir.display(), "started pack file");
        Ok(())
    }

    fn append_blob(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        if self.appended >= self.fan_out {
            self.start_pack()?;
        }

        let pack = self
            .packs
            .get_mut(&self.current)
            .ok_or_else(|| StorageError::Corrupted(format!("pack {} not open", self.current)))?;
        let offset = pack.append(data)?;
        pack.sync()?;
        self.appended += 1;

        let loc = Location {
            pack: self.current,
            offset,
            len: data.len() as u64,
        };
        self.entries.insert(key.to_string(), loc);
        self.live.entry(loc.pack).or_default().insert(key.to_string());
        Ok(())
    }

    fn read_location(&self, key: &str, loc: Location) -> StorageResult<Vec<u8>> {
        let pack = self.packs.get(&loc.pack).ok_or_else(|| {
            StorageError::Corrupted(format!("blob {key} points at missing pack {}", loc.pack))
        })?;
        let len = usize::try_from(loc.len)
            .map_err(|_| StorageError::Corrupted(format!("blob {key} length overflow")))?;
        pack.read_at(loc.offset, len)
    }

    /// Drops `key` from the live set of `pack`, removing the pack file once
    /// nothing in it is live.
    fn retire(&mut self, pack: u32, key: &str) -> StorageResult<()> {
        let empty = match self.live.get_mut(&pack) {
            Some(keys) => {
                keys.remove(key);
                keys.is_empty()
            }
            None => true,
        };
        if empty && pack != self.current {
            self.remove_pack(pack)?;
        }
        Ok(())
    }

    fn remove_pack(&mut self, pack: u32) -> StorageResult<()> {
        self.live.remove(&pack);
        if let Some(file) = self.packs.remove(&pack) {
            let path = file.path().to_path_buf();
            drop(file);
            fs::remove_file(&path)?;
            debug!(pack, "removed pack file");
        }
        Ok(())
    }

    fn persist_map(&self) -> StorageResult<()> {
        let tmp = self.dir.join(MAP_TEMP);
        fs::write(&tmp, encode_map(self.current, self.next_pack, &self.entries))?;
        fs::rename(&tmp, self.dir.join(MAP_FILE))?;
        Ok(())
    }
}

impl BlobStore for CompactingBlobStore {
    fn store(&mut self, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        let previous = self.entries.get(key).copied();

        self.append_blob(key, data)?;
        if let Some(old) = previous {
            if old.pack != self.current {
                self.retire(old.pack, key)?;
            }
        }

        self.persist_map()
    }

    fn get(&self, key: &str) -> StorageResult<Vec<u8>> {
        let loc = self
            .entries
            .get(key)
            .copied()
            .ok_or_else(|| StorageError::not_found(key))?;
        self.read_location(key, loc)
    }

    fn delete(&mut self, key: &str) -> StorageResult<()> {
        let Some(loc) = self.entries.get(key).copied() else {
            return Ok(());
        };

        let survivors: Vec<String> = self
            .live
            .get(&loc.pack)
            .map(|keys| keys.iter().filter(|k| *k != key).cloned().collect())
            .unwrap_or_default();

        let mut copies = Vec::with_capacity(survivors.len());
        for sibling in &survivors {
            let sibling_loc = self.entries.get(sibling).copied().ok_or_else(|| {
                StorageError::Corrupted(format!(
                    "pack {} lists {sibling}, which has no MAP entry",
                    loc.pack
                ))
            })?;
            copies.push((sibling.clone(), self.read_location(sibling, sibling_loc)?));
        }
        self.entries.remove(key);

        if !copies.is_empty() || loc.pack == self.current {
            self.start_pack()?;
        }
        for (sibling, data) in copies {
            self.append_blob(&sibling, &data)?;
        }
        self.remove_pack(loc.pack)?;

        debug!(
            key,
            pack = loc.pack,
            moved = survivors.len(),
            "compacted pack after delete"
        );
        self.persist_map()
    }

    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.entries.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.keys().cloned().collect())
    }
}

fn pack_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("pack-{id:06}.dat"))
}

fn encode_map(current: u32, next: u32, entries: &HashMap<String, Location>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAP_MAGIC);
    buf.extend_from_slice(&MAP_VERSION.to_le_bytes());
    buf.extend_from_slice(&current.to_le_bytes());
    buf.extend_from_slice(&next.to_le_bytes());

    let count = u32::try_from(entries.len()).unwrap_or(u32::MAX);
    buf.extend_from_slice(&count.to_le_bytes());

    for (key, loc) in entries {
        let key_bytes = key.as_bytes();
        let key_len = u16::try_from(key_bytes.len()).unwrap_or(u16::MAX);
        buf.extend_from_slice(&key_len.to_le_bytes());
        buf.extend_from_slice(&key_bytes[..usize::from(key_len)]);
        buf.extend_from_slice(&loc.pack.to_le_bytes());
        buf.extend_from_slice(&loc.offset.to_le_bytes());
        buf.extend_from_slice(&loc.len.to_le_bytes());
    }
    buf
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> StorageResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(StorageError::Corrupted("MAP file truncated".into()));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn u16(&mut self) -> StorageResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_le_bytes(arr))
    }
}

fn decode_map(data: &[u8]) -> StorageResult<(u32, u32, HashMap<String, Location>)> {
    let mut cursor = Cursor { data, pos: 0 };

    if cursor.take(4)? != MAP_MAGIC {
        return Err(StorageError::Corrupted("invalid MAP magic".into()));
    }
    let version = cursor.u16()?;
    if version > MAP_VERSION {
        return Err(StorageError::Corrupted(format!(
            "unsupported MAP version: {version}"
        )));
    }

    let current = cursor.u32()?;
    let next = cursor.u32()?;
    let count = cursor.u32()?;

    let capacity = usize::try_from(count).map_or(MAP_PREALLOC, |n| n.min(MAP_PREALLOC));
    let mut entries = HashMap::with_capacity(capacity);
    for _ in 0..count {
        let key_len = usize::from(cursor.u16()?);
        let key = std::str::from_utf8(cursor.take(key_len)?)
            .map_err(|_| StorageError::Corrupted("invalid UTF-8 key in MAP".into()))?
            .to_string();
        let loc = Location {
            pack: cursor.u32()?,
            offset: cursor.u64()?,
            len: cursor.u64()?,
        };
        entries.insert(key, loc);
    }

    Ok((current, next, entries))
}
