use std::collections::HashSet;
use std::convert::TryInto;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use crate::types::{Result, StoreError};

const MAP_MAGIC: [u8; 4] = *b"PMAP";
const MAP_FORMAT_VERSION: u16 = 1;

const MAP_HDR_LEN: usize = 64;
const MAP_MAGIC_RANGE: Range<usize> = 0..4;
const MAP_VERSION: Range<usize> = 4..6;
const MAP_RESERVED: Range<usize> = 6..8;
const MAP_PAGE_SIZE: Range<usize> = 8..12;
const MAP_CRC32: Range<usize> = 12..16;
const MAP_SALT: Range<usize> = 16..24;
const MAP_PAGE_COUNT: Range<usize> = 24..32;
const MAP_ON_DISK: Range<usize> = 32..40;
const MAP_RELEASED: Range<usize> = 40..48;

const UNASSIGNED: u64 = u64::MAX;

/// Counters describing page-map occupancy.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct PageMapStats {
    /// Logical pages ever issued (live + released).
    pub page_count: u64,
    /// Page-sized slots occupied in the data file.
    pub on_disk_pages: u64,
    /// Released indices waiting on the free list.
    pub released_pages: u64,
    /// Released indices still holding a disk slot that compaction can reclaim.
    pub reclaimable_pages: u64,
}

/// One move performed while compacting the data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Relocation {
    /// Logical page being moved.
    pub page: u64,
    /// Byte offset the page currently lives at.
    pub from: u64,
    /// Byte offset the page moves to.
    pub to: u64,
}

/// Logical page index to physical offset table plus the LIFO free list.
#[derive(Clone, Debug)]
pub struct PageMap {
    page_size: u32,
    salt: u64,
    offsets: Vec<u64>,
    free: Vec<u64>,
    free_set: HashSet<u64>,
    on_disk_pages: u64,
    dirty: bool,
}

impl PageMap {
    /// Creates an empty map for a store of `page_size` pages.
    pub fn new(page_size: u32, salt: u64) -> Self {
        Self {
            page_size,
            salt,
            offsets: Vec::new(),
            free: Vec::new(),
            free_set: HashSet::new(),
            on_disk_pages: 0,
            dirty: true,
        }
    }

    /// Page size recorded for the store.
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Random salt mixed into every page checksum.
    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Occupancy counters.
    pub fn stats(&self) -> PageMapStats {
        PageMapStats {
            page_count: self.offsets.len() as u64,
            on_disk_pages: self.on_disk_pages,
            released_pages: self.free.len() as u64,
            reclaimable_pages: self
                .free
                .iter()
                .filter(|&&index| self.offsets[index as usize] != UNASSIGNED)
                .count() as u64,
        }
    }

    /// Whether the map changed since it was last persisted.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Issues a page index: the most recently released one if any, else a new one.
    pub fn create(&mut self) -> u64 {
        self.dirty = true;
        if let Some(index) = self.free.pop() {
            self.free_set.remove(&index);
            return index;
        }
        self.offsets.push(UNASSIGNED);
        (self.offsets.len() - 1) as u64
    }

    /// Returns `index` to the free list. Its disk slot stays reserved for reuse.
    pub fn release(&mut self, index: u64) -> Result<()> {
        if !self.is_live(index) {
            return Err(StoreError::Invalid("release of a page that is not live"));
        }
        self.free.push(index);
        self.free_set.insert(index);
        self.dirty = true;
        Ok(())
    }

    /// `true` when `index` was issued and is not on the free list.
    pub fn is_live(&self, index: u64) -> bool {
        (index as usize) < self.offsets.len() && !self.free_set.contains(&index)
    }

    /// Byte offset of a page, `None` when it was never written.
    pub fn offset(&self, index: u64) -> Option<u64> {
        match self.offsets.get(index as usize) {
            Some(&UNASSIGNED) | None => None,
            Some(&offset) => Some(offset),
        }
    }

    /// Returns the offset of `index`, appending a disk slot the first time it is written.
    pub fn assign_offset(&mut self, index: u64) -> Result<u64> {
        if !self.is_live(index) {
            return Err(StoreError::Invalid("write to a page that is not live"));
        }
        if let Some(offset) = self.offset(index) {
            return Ok(offset);
        }
        let offset = self
            .on_disk_pages
            .checked_mul(self.page_size as u64)
            .ok_or(StoreError::Invalid("data file offset overflow"))?;
        self.offsets[index as usize] = offset;
        self.on_disk_pages += 1;
        self.dirty = true;
        Ok(offset)
    }

    /// Plans the moves that pack every live page below the live-page count.
    ///
    /// Disk slots held by released pages are surrendered; after applying the plan with
    /// [`PageMap::apply_compaction`] the data file can be truncated to the returned length.
    pub fn compaction_plan(&self) -> (Vec<Relocation>, u64) {
        let page_size = self.page_size as u64;
        let mut live_slots = Vec::new();
        for (index, &offset) in self.offsets.iter().enumerate() {
            if offset != UNASSIGNED && !self.free_set.contains(&(index as u64)) {
                live_slots.push((index as u64, offset / page_size));
            }
        }
        let target = live_slots.len() as u64;
        let occupied: HashSet<u64> = live_slots
            .iter()
            .filter(|(_, slot)| *slot < target)
            .map(|(_, slot)| *slot)
            .collect();
        let mut holes = (0..target).filter(|slot| !occupied.contains(slot));
        let mut moves = Vec::new();
        for (index, slot) in live_slots {
            if slot < target {
                continue;
            }
            if let Some(hole) = holes.next() {
                moves.push(Relocation {
                    page: index,
                    from: slot * page_size,
                    to: hole * page_size,
                });
            }
        }
        (moves, target * page_size)
    }

    /// Records the result of a compaction computed by [`PageMap::compaction_plan`].
    pub fn apply_compaction(&mut self, moves: &[Relocation], new_len: u64) {
        for mv in moves {
            self.offsets[mv.page as usize] = mv.to;
        }
        for &index in &self.free {
            self.offsets[index as usize] = UNASSIGNED;
        }
        self.on_disk_pages = new_len / self.page_size as u64;
        self.dirty = true;
    }

    /// Serializes the map.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            vec![0u8; MAP_HDR_LEN + (self.offsets.len() + self.free.len()) * 8];
        buf[MAP_MAGIC_RANGE].copy_from_slice(&MAP_MAGIC);
        buf[MAP_VERSION].copy_from_slice(&MAP_FORMAT_VERSION.to_be_bytes());
        buf[MAP_PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
        buf[MAP_SALT].copy_from_slice(&self.salt.to_be_bytes());
        buf[MAP_PAGE_COUNT].copy_from_slice(&(self.offsets.len() as u64).to_be_bytes());
        buf[MAP_ON_DISK].copy_from_slice(&self.on_disk_pages.to_be_bytes());
        buf[MAP_RELEASED].copy_from_slice(&(self.free.len() as u64).to_be_bytes());
        let mut pos = MAP_HDR_LEN;
        for value in self.offsets.iter().chain(self.free.iter()) {
            buf[pos..pos + 8].copy_from_slice(&value.to_be_bytes());
            pos += 8;
        }
        let crc = crc32fast::hash(&buf);
        buf[MAP_CRC32].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Parses bytes written by [`PageMap::encode`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < MAP_HDR_LEN {
            return Err(StoreError::Corruption("page map truncated"));
        }
        if buf[MAP_MAGIC_RANGE] != MAP_MAGIC {
            return Err(StoreError::Corruption("invalid page map magic"));
        }
        let version = u16::from_be_bytes(buf[MAP_VERSION].try_into().unwrap());
        if version != MAP_FORMAT_VERSION {
            return Err(StoreError::Corruption("unsupported page map version"));
        }
        if buf[MAP_RESERVED].iter().any(|b| *b != 0) {
            return Err(StoreError::Corruption("page map reserved field non-zero"));
        }
        let stored_crc = u32::from_be_bytes(buf[MAP_CRC32].try_into().unwrap());
        let mut scratch = buf.to_vec();
        scratch[MAP_CRC32].fill(0);
        if crc32fast::hash(&scratch) != stored_crc {
            return Err(StoreError::Corruption("page map crc mismatch"));
        }
        let page_size = u32::from_be_bytes(buf[MAP_PAGE_SIZE].try_into().unwrap());
        let salt = u64::from_be_bytes(buf[MAP_SALT].try_into().unwrap());
        let page_count = u64::from_be_bytes(buf[MAP_PAGE_COUNT].try_into().unwrap()) as usize;
        let on_disk_pages = u64::from_be_bytes(buf[MAP_ON_DISK].try_into().unwrap());
        let released = u64::from_be_bytes(buf[MAP_RELEASED].try_into().unwrap()) as usize;
        let expected = page_count
            .checked_add(released)
            .and_then(|n| n.checked_mul(8))
            .and_then(|n| n.checked_add(MAP_HDR_LEN))
            .ok_or(StoreError::Corruption("page map counts overflow"))?;
        if buf.len() != expected {
            return Err(StoreError::Corruption("page map length mismatch"));
        }
        let read = |i: usize| {
            let pos = MAP_HDR_LEN + i * 8;
            u64::from_be_bytes(buf[pos..pos + 8].try_into().unwrap())
        };
        let offsets: Vec<u64> = (0..page_count).map(read).collect();
        let free: Vec<u64> = (page_count..page_count + released).map(read).collect();
        let mut free_set = HashSet::with_capacity(free.len());
        for &index in &free {
            if index as usize >= page_count || !free_set.insert(index) {
                return Err(StoreError::Corruption("page map free list is invalid"));
            }
        }
        Ok(Self {
            page_size,
            salt,
            offsets,
            free,
            free_set,
            on_disk_pages,
            dirty: false,
        })
    }

    /// Reads the map from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Self::decode(&buf)
    }

    /// Atomically replaces the map file at `path`.
    pub fn persist(&mut self, path: &Path) -> Result<()> {
        let bytes = self.encode();
        let tmp = append_suffix(path, ".tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        self.dirty = false;
        Ok(())
    }

    /// Whether a map file exists at `path`.
    pub fn exists(path: &Path) -> Result<bool> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::from(err)),
        }
    }
}

/// Path of the page-map file kept next to the data file.
pub fn map_path(path: &Path) -> PathBuf {
    append_suffix(path, "-map")
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("pagekv"));
    name.push(suffix);
    let mut new_path = path.to_path_buf();
    new_path.set_file_name(name);
    new_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn released_indices_are_reused_lifo() {
        let mut map = PageMap::new(4096, 1);
        let a = map.create();
        let b = map.create();
        let c = map.create();
        assert_eq!((a, b, c), (0, 1, 2));
        map.release(a).unwrap();
        map.release(c).unwrap();
        assert_eq!(map.create(), c);
        assert_eq!(map.create(), a);
        assert_eq!(map.create(), 3);
    }

    #[test]
    fn release_rejects_dead_pages() {
        let mut map = PageMap::new(4096, 1);
        let a = map.create();
        map.release(a).unwrap();
        assert!(map.release(a).is_err());
        assert!(map.release(42).is_err());
        assert!(map.assign_offset(a).is_err());
    }

    #[test]
    fn offsets_assigned_on_first_write_and_kept_across_reuse() {
        let mut map = PageMap::new(4096, 1);
        let a = map.create();
        let b = map.create();
        assert_eq!(map.offset(a), None);
        assert_eq!(map.assign_offset(b).unwrap(), 0);
        assert_eq!(map.assign_offset(a).unwrap(), 4096);
        assert_eq!(map.assign_offset(b).unwrap(), 0);
        map.release(b).unwrap();
        assert_eq!(map.create(), b);
        assert_eq!(map.offset(b), Some(0));
        assert_eq!(map.stats().on_disk_pages, 2);
    }

    #[test]
    fn encode_decode_and_persist() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store-map");
        let mut map = PageMap::new(8192, 99);
        for _ in 0..5 {
            let idx = map.create();
            map.assign_offset(idx).unwrap();
        }
        map.release(1).unwrap();
        map.release(3).unwrap();
        map.persist(&path).unwrap();
        assert!(!map.is_dirty());
        let loaded = PageMap::load(&path).unwrap();
        assert_eq!(loaded.stats(), map.stats());
        assert_eq!(loaded.salt(), 99);
        assert!(!loaded.is_live(3));
        assert!(loaded.is_live(4));
        let mut loaded = loaded;
        assert_eq!(loaded.create(), 3);
    }

    #[test]
    fn decode_detects_corruption() {
        let mut map = PageMap::new(4096, 5);
        map.create();
        let mut bytes = map.encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(PageMap::decode(&bytes).is_err());
    }

    #[test]
    fn compaction_moves_tail_pages_into_holes() {
        let mut map = PageMap::new(4096, 1);
        for _ in 0..4 {
            let idx = map.create();
            map.assign_offset(idx).unwrap();
        }
        map.release(0).unwrap();
        map.release(1).unwrap();
        let (moves, len) = map.compaction_plan();
        assert_eq!(len, 2 * 4096);
        assert_eq!(moves.len(), 2);
        map.apply_compaction(&moves, len);
        assert_eq!(map.offset(0), None);
        assert!(map.offset(2).unwrap() < len);
        assert!(map.offset(3).unwrap() < len);
        assert_ne!(map.offset(2), map.offset(3));
        assert_eq!(map.stats().on_disk_pages, 2);
        let reused = map.create();
        assert_eq!(reused, 1);
        assert_eq!(map.assign_offset(reused).unwrap(), len);
    }

    #[test]
    fn map_path_appends_suffix() {
        assert_eq!(
            map_path(Path::new("/tmp/data.kv")),
            PathBuf::from("/tmp/data.kv-map")
        );
    }
}
