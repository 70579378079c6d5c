use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{rngs::OsRng, RngCore};
use tracing::{debug, info};

use super::page::Page;
use super::page_map::{map_path, PageMap, PageMapStats};
use crate::primitives::io::{FileIo, StdFileIo};
use crate::types::{
    page::{self, header, PageHeader, PageKind, PAGE_HDR_LEN},
    page_crc32, PageId, Result, StoreError,
};

/// Outcome of a data-file compaction.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize)]
pub struct CompactionReport {
    /// Pages copied to a lower offset.
    pub moved_pages: u64,
    /// Bytes removed from the end of the data file.
    pub reclaimed_bytes: u64,
}

/// Page lifecycle over a store.
///
/// Implementations are internally synchronized; callers serialize structural changes
/// through the storage-level lock.
pub trait PageManager: Send + Sync {
    /// Size of every page in bytes.
    fn page_size(&self) -> usize;
    /// Issues a new page, reusing the most recently removed index first.
    fn create_page(&self) -> Result<Page>;
    /// Returns the current content of a live page.
    fn fetch_page(&self, index: PageId) -> Result<Page>;
    /// Writes a page back.
    fn update_page(&self, page: &Page) -> Result<()>;
    /// Returns a page index to the free list.
    fn remove_page(&self, index: PageId) -> Result<()>;
    /// `true` when `index` is issued and not removed.
    fn page_exists(&self, index: PageId) -> bool;
    /// Makes every completed write durable.
    fn flush(&self) -> Result<()>;
    /// Page-map counters.
    fn stats(&self) -> PageMapStats;
    /// Packs live pages and truncates the data file. Callers flush first.
    fn compact(&self) -> Result<CompactionReport>;
    /// Exempts a page from eviction. Managers without a cache ignore it.
    fn pin(&self, _index: PageId) -> Result<()> {
        Ok(())
    }
    /// Clears a flag set by [`PageManager::pin`].
    fn unpin(&self, _index: PageId) -> Result<()> {
        Ok(())
    }
    /// Offers a decoded backing for a page that was just fetched.
    fn attach_backing(&self, _page: &Page) {}
}

/// Page manager backed by a data file plus a page-map file.
pub struct FilePageManager {
    io: Arc<dyn FileIo>,
    map_path: PathBuf,
    page_size: usize,
    forced_writes: bool,
    map: Mutex<PageMap>,
}

impl FilePageManager {
    /// Creates a brand-new store. Fails if either file already exists.
    pub fn create(path: impl AsRef<Path>, page_size: u32, forced_writes: bool) -> Result<Self> {
        if !page::is_supported_page_size(page_size) {
            return Err(StoreError::Invalid("unsupported page size"));
        }
        let path = path.as_ref();
        let map_path = map_path(path);
        if PageMap::exists(&map_path)? {
            return Err(StoreError::Invalid("page map file already exists"));
        }
        let io = StdFileIo::create_new(path)?;
        let mut map = PageMap::new(page_size, OsRng.next_u64());
        map.persist(&map_path)?;
        debug!(path = %path.display(), page_size, "created page store");
        Ok(Self {
            io: Arc::new(io),
            map_path,
            page_size: page_size as usize,
            forced_writes,
            map: Mutex::new(map),
        })
    }

    /// Opens an existing store.
    pub fn open(path: impl AsRef<Path>, forced_writes: bool) -> Result<Self> {
        let path = path.as_ref();
        let map_path = map_path(path);
        let map = PageMap::load(&map_path)?;
        if !page::is_supported_page_size(map.page_size()) {
            return Err(StoreError::Corruption("page map records unsupported page size"));
        }
        let io = StdFileIo::open_existing(path)?;
        let required = map.stats().on_disk_pages * map.page_size() as u64;
        if io.len()? < required {
            return Err(StoreError::Corruption("data file shorter than page map"));
        }
        debug!(
            path = %path.display(),
            page_size = map.page_size(),
            pages = map.stats().page_count,
            "opened page store"
        );
        Ok(Self {
            io: Arc::new(io),
            map_path,
            page_size: map.page_size() as usize,
            forced_writes,
            map: Mutex::new(map),
        })
    }

    fn verify(&self, index: PageId, buf: &[u8], salt: u64) -> Result<()> {
        let header = PageHeader::decode(buf)?;
        if header.page_no != index {
            return Err(StoreError::Corruption("page index mismatch"));
        }
        let mut scratch = buf.to_vec();
        page::clear_crc32(&mut scratch[..PAGE_HDR_LEN])?;
        if page_crc32(index.0, salt, &scratch) != header.crc32 {
            return Err(StoreError::Corruption("page crc mismatch"));
        }
        Ok(())
    }
}

impl PageManager for FilePageManager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn create_page(&self) -> Result<Page> {
        let index = self.map.lock().create();
        Page::new(PageId(index), self.page_size, PageKind::Unformatted)
    }

    fn fetch_page(&self, index: PageId) -> Result<Page> {
        let map = self.map.lock();
        if !map.is_live(index.0) {
            return Err(StoreError::Invalid("fetch of a page that is not live"));
        }
        let Some(offset) = map.offset(index.0) else {
            return Page::new(index, self.page_size, PageKind::Unformatted);
        };
        let salt = map.salt();
        drop(map);
        let mut buf = vec![0u8; self.page_size];
        self.io.read_at(offset, &mut buf)?;
        self.verify(index, &buf, salt)?;
        Ok(Page::from_bytes(index, buf))
    }

    fn update_page(&self, page: &Page) -> Result<()> {
        if page.len() != self.page_size {
            return Err(StoreError::Invalid("page length does not match page size"));
        }
        let mut map = self.map.lock();
        let offset = map.assign_offset(page.index().0)?;
        let mut buf = page.data().to_vec();
        buf[header::PAGE_NO].copy_from_slice(&page.index().0.to_be_bytes());
        page::clear_crc32(&mut buf[..PAGE_HDR_LEN])?;
        let crc = page_crc32(page.index().0, map.salt(), &buf);
        buf[header::CRC32].copy_from_slice(&crc.to_be_bytes());
        self.io.write_at(offset, &buf)?;
        if self.forced_writes {
            self.io.sync_all()?;
        }
        Ok(())
    }

    fn remove_page(&self, index: PageId) -> Result<()> {
        self.map.lock().release(index.0)
    }

    fn page_exists(&self, index: PageId) -> bool {
        self.map.lock().is_live(index.0)
    }

    fn flush(&self) -> Result<()> {
        self.io.sync_all()?;
        let mut map = self.map.lock();
        if map.is_dirty() {
            map.persist(&self.map_path)?;
        }
        Ok(())
    }

    fn stats(&self) -> PageMapStats {
        self.map.lock().stats()
    }

    fn compact(&self) -> Result<CompactionReport> {
        let mut map = self.map.lock();
        let before = map.stats().on_disk_pages * self.page_size as u64;
        let (moves, new_len) = map.compaction_plan();
        let mut buf = vec![0u8; self.page_size];
        for mv in &moves {
            self.io.read_at(mv.from, &mut buf)?;
            self.io.write_at(mv.to, &buf)?;
        }
        self.io.sync_all()?;
        map.apply_compaction(&moves, new_len);
        map.persist(&self.map_path)?;
        self.io.truncate(new_len)?;
        let report = CompactionReport {
            moved_pages: moves.len() as u64,
            reclaimed_bytes: before.saturating_sub(new_len),
        };
        info!(
            moved = report.moved_pages,
            reclaimed = report.reclaimed_bytes,
            "compacted data file"
        );
        Ok(report)
    }
}
