use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::manager::{CompactionReport, PageManager};
use super::page::Page;
use super::page_map::PageMapStats;
use crate::types::{PageId, Result, StoreError};

/// Limits applied by [`CachingPageManager`].
#[derive(Clone, Copy, Debug)]
pub struct CacheLimits {
    /// Maximum number of resident pages.
    pub max_cached_pages: usize,
    /// Dirty pages tolerated before every dirty page is written back.
    pub max_dirty_pages: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_cached_pages: 1000,
            max_dirty_pages: 1000,
        }
    }
}

/// Cache counters.
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct CacheStats {
    /// Fetches served from memory.
    pub hits: u64,
    /// Fetches that went to the underlying manager.
    pub misses: u64,
    /// Pages dropped to respect the size bound.
    pub evictions: u64,
    /// Dirty-limit triggered write-backs.
    pub forced_flushes: u64,
    /// Pages currently resident.
    pub resident: usize,
    /// Resident pages not yet written back.
    pub dirty: usize,
}

struct CacheEntry {
    page: Page,
    dirty: bool,
    pinned: bool,
}

struct CacheState {
    pages: LruCache<PageId, CacheEntry>,
    dirty: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
    forced_flushes: u64,
}

/// Bounded write-back cache in front of another [`PageManager`].
pub struct CachingPageManager {
    inner: Arc<dyn PageManager>,
    limits: CacheLimits,
    state: Mutex<CacheState>,
}

impl CachingPageManager {
    /// Wraps `inner`. Limits are clamped so at least one page can be resident.
    pub fn new(inner: Arc<dyn PageManager>, limits: CacheLimits) -> Self {
        let limits = CacheLimits {
            max_cached_pages: limits.max_cached_pages.max(1),
            max_dirty_pages: limits.max_dirty_pages.max(1),
        };
        Self {
            inner,
            limits,
            state: Mutex::new(CacheState {
                pages: LruCache::unbounded(),
                dirty: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                forced_flushes: 0,
            }),
        }
    }

    /// Fraction of fetches served from memory. Diagnostics only.
    pub fn success_rate(&self) -> f64 {
        let state = self.state.lock();
        let total = state.hits + state.misses;
        if total == 0 {
            0.0
        } else {
            state.hits as f64 / total as f64
        }
    }

    /// Snapshot of the cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            forced_flushes: state.forced_flushes,
            resident: state.pages.len(),
            dirty: state.dirty,
        }
    }

    /// Whether `index` is resident and pinned.
    pub fn is_pinned(&self, index: PageId) -> bool {
        self.state
            .lock()
            .pages
            .peek(&index)
            .map(|entry| entry.pinned)
            .unwrap_or(false)
    }

    fn write_back_all(&self, state: &mut CacheState) -> Result<()> {
        let CacheState { pages, dirty, .. } = state;
        for (_, entry) in pages.iter_mut() {
            if entry.dirty {
                self.inner.update_page(&entry.page)?;
                entry.dirty = false;
                *dirty -= 1;
            }
        }
        Ok(())
    }

    fn evict_over_limit(&self, state: &mut CacheState) -> Result<()> {
        while state.pages.len() > self.limits.max_cached_pages {
            let victim = state
                .pages
                .iter()
                .rev()
                .find(|(_, entry)| !entry.pinned)
                .map(|(index, _)| *index);
            let Some(victim) = victim else {
                warn!(
                    resident = state.pages.len(),
                    "every cached page is pinned; cache temporarily over its bound"
                );
                return Ok(());
            };
            if let Some(entry) = state.pages.peek(&victim) {
                if entry.dirty {
                    self.inner.update_page(&entry.page)?;
                    state.dirty -= 1;
                }
            }
            state.pages.pop(&victim);
            state.evictions += 1;
            trace!(page = victim.0, "evicted page");
        }
        Ok(())
    }

    fn load(&self, state: &mut CacheState, index: PageId) -> Result<()> {
        if state.pages.contains(&index) {
            return Ok(());
        }
        let page = self.inner.fetch_page(index)?;
        state.pages.put(
            index,
            CacheEntry {
                page,
                dirty: false,
                pinned: false,
            },
        );
        self.evict_over_limit(state)
    }
}

impl PageManager for CachingPageManager {
    fn page_size(&self) -> usize {
        self.inner.page_size()
    }

    fn create_page(&self) -> Result<Page> {
        let page = self.inner.create_page()?;
        let mut state = self.state.lock();
        state.pages.put(
            page.index(),
            CacheEntry {
                page: page.clone(),
                dirty: false,
                pinned: false,
            },
        );
        self.evict_over_limit(&mut state)?;
        Ok(page)
    }

    fn fetch_page(&self, index: PageId) -> Result<Page> {
        let mut state = self.state.lock();
        if let Some(entry) = state.pages.get(&index) {
            let page = entry.page.clone();
            state.hits += 1;
            return Ok(page);
        }
        state.misses += 1;
        let page = self.inner.fetch_page(index)?;
        state.pages.put(
            index,
            CacheEntry {
                page: page.clone(),
                dirty: false,
                pinned: false,
            },
        );
        self.evict_over_limit(&mut state)?;
        Ok(page)
    }

    fn update_page(&self, page: &Page) -> Result<()> {
        if !self.inner.page_exists(page.index()) {
            return Err(StoreError::Invalid("write to a page that is not live"));
        }
        let mut state = self.state.lock();
        let mut newly_dirty = true;
        let mut pinned = false;
        if let Some(entry) = state.pages.get_mut(&page.index()) {
            newly_dirty = !entry.dirty;
            pinned = entry.pinned;
        }
        state.pages.put(
            page.index(),
            CacheEntry {
                page: page.clone(),
                dirty: true,
                pinned,
            },
        );
        if newly_dirty {
            state.dirty += 1;
        }
        if state.dirty > self.limits.max_dirty_pages {
            debug!(dirty = state.dirty, "dirty page limit crossed; flushing");
            state.forced_flushes += 1;
            self.write_back_all(&mut state)?;
            self.inner.flush()?;
        }
        self.evict_over_limit(&mut state)
    }

    fn remove_page(&self, index: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.pages.pop(&index) {
            if entry.dirty {
                state.dirty -= 1;
            }
        }
        self.inner.remove_page(index)
    }

    fn page_exists(&self, index: PageId) -> bool {
        self.inner.page_exists(index)
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.write_back_all(&mut state)?;
        self.inner.flush()
    }

    fn stats(&self) -> PageMapStats {
        self.inner.stats()
    }

    fn compact(&self) -> Result<CompactionReport> {
        self.flush()?;
        self.inner.compact()
    }

    fn pin(&self, index: PageId) -> Result<()> {
        let mut state = self.state.lock();
        self.load(&mut state, index)?;
        let entry = state
            .pages
            .get_mut(&index)
            .ok_or(StoreError::Invalid("pinned page was not resident"))?;
        if entry.pinned {
            return Err(StoreError::Invalid("page is already pinned"));
        }
        entry.pinned = true;
        Ok(())
    }

    fn unpin(&self, index: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(entry) = state.pages.peek_mut(&index) {
            entry.pinned = false;
        }
        self.evict_over_limit(&mut state)
    }

    fn attach_backing(&self, page: &Page) {
        let mut state = self.state.lock();
        if let Some(entry) = state.pages.peek_mut(&page.index()) {
            if entry.page.shares_bytes_with(page) {
                entry.page = page.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::{FilePageManager, PageBacking};
    use crate::storage::btree::BPlusTreeNode;
    use crate::types::page::PageKind;
    use tempfile::tempdir;

    fn cache(dir: &std::path::Path, limits: CacheLimits) -> (Arc<FilePageManager>, CachingPageManager) {
        let file = Arc::new(FilePageManager::create(dir.join("db"), 4096, false).unwrap());
        let cache = CachingPageManager::new(file.clone(), limits);
        (file, cache)
    }

    fn write(cache: &CachingPageManager, marker: u8) -> PageId {
        let mut page = cache.create_page().unwrap();
        page.set_kind(PageKind::Slotted);
        page.body_mut()[0] = marker;
        cache.update_page(&page).unwrap();
        page.index()
    }

    #[test]
    fn resident_pages_stay_within_bound() {
        let dir = tempdir().unwrap();
        let (_file, cache) = cache(
            dir.path(),
            CacheLimits {
                max_cached_pages: 4,
                max_dirty_pages: 100,
            },
        );
        let ids: Vec<PageId> = (0..10u8).map(|m| write(&cache, m)).collect();
        assert!(cache.cache_stats().resident <= 4);
        for (marker, id) in ids.iter().enumerate() {
            assert_eq!(cache.fetch_page(*id).unwrap().body()[0], marker as u8);
        }
        assert!(cache.cache_stats().evictions > 0);
    }

    #[test]
    fn dirty_limit_forces_write_back() {
        let dir = tempdir().unwrap();
        let (file, cache) = cache(
            dir.path(),
            CacheLimits {
                max_cached_pages: 100,
                max_dirty_pages: 3,
            },
        );
        for marker in 0..3u8 {
            write(&cache, marker);
        }
        assert_eq!(file.stats().on_disk_pages, 0);
        write(&cache, 3);
        assert_eq!(file.stats().on_disk_pages, 4);
        let stats = cache.cache_stats();
        assert_eq!(stats.dirty, 0);
        assert_eq!(stats.forced_flushes, 1);
    }

    #[test]
    fn pinned_pages_are_not_evicted() {
        let dir = tempdir().unwrap();
        let (_file, cache) = cache(
            dir.path(),
            CacheLimits {
                max_cached_pages: 2,
                max_dirty_pages: 100,
            },
        );
        let first = write(&cache, 1);
        cache.pin(first).unwrap();
        for marker in 2..8u8 {
            write(&cache, marker);
        }
        assert!(cache.is_pinned(first));
        cache.unpin(first).unwrap();
        assert!(!cache.is_pinned(first));
    }

    #[test]
    fn pin_is_not_reentrant() {
        let dir = tempdir().unwrap();
        let (_file, cache) = cache(dir.path(), CacheLimits::default());
        let id = write(&cache, 1);
        cache.pin(id).unwrap();
        assert!(cache.pin(id).is_err());
        cache.unpin(id).unwrap();
        cache.pin(id).unwrap();
    }

    #[test]
    fn success_rate_tracks_hits() {
        let dir = tempdir().unwrap();
        let (_file, cache) = cache(dir.path(), CacheLimits::default());
        assert_eq!(cache.success_rate(), 0.0);
        let id = write(&cache, 1);
        cache.fetch_page(id).unwrap();
        cache.fetch_page(id).unwrap();
        assert_eq!(cache.success_rate(), 1.0);
    }

    #[test]
    fn backing_survives_until_page_rewritten() {
        let dir = tempdir().unwrap();
        let (_file, cache) = cache(dir.path(), CacheLimits::default());
        let id = write(&cache, 1);
        let mut fetched = cache.fetch_page(id).unwrap();
        assert!(fetched.backing().is_none());
        let node = BPlusTreeNode::new_leaf(id);
        fetched.set_backing(PageBacking::BPlusTreeNode(Arc::new(node)));
        cache.attach_backing(&fetched);
        let again = cache.fetch_page(id).unwrap();
        assert!(again.backing().is_some());
        let mut modified = again.clone();
        modified.body_mut()[1] = 9;
        cache.update_page(&modified).unwrap();
        assert!(cache.fetch_page(id).unwrap().backing().is_none());
    }

    struct LimitedWrites {
        inner: Arc<FilePageManager>,
        allowed: std::sync::atomic::AtomicUsize,
    }

    impl PageManager for LimitedWrites {
        fn page_size(&self) -> usize {
            self.inner.page_size()
        }
        fn create_page(&self) -> Result<Page> {
            self.inner.create_page()
        }
        fn fetch_page(&self, index: PageId) -> Result<Page> {
            self.inner.fetch_page(index)
        }
        fn update_page(&self, page: &Page) -> Result<()> {
            use std::sync::atomic::Ordering;
            self.allowed
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .map_err(|_| StoreError::Invalid("write budget exhausted"))?;
            self.inner.update_page(page)
        }
        fn remove_page(&self, index: PageId) -> Result<()> {
            self.inner.remove_page(index)
        }
        fn page_exists(&self, index: PageId) -> bool {
            self.inner.page_exists(index)
        }
        fn flush(&self) -> Result<()> {
            self.inner.flush()
        }
        fn stats(&self) -> PageMapStats {
            self.inner.stats()
        }
        fn compact(&self) -> Result<CompactionReport> {
            self.inner.compact()
        }
    }

    #[test]
    fn failed_write_back_keeps_unwritten_pages_counted() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let dir = tempdir().unwrap();
        let file = Arc::new(FilePageManager::create(dir.path().join("db"), 4096, false).unwrap());
        let limited = Arc::new(LimitedWrites {
            inner: file,
            allowed: AtomicUsize::new(usize::MAX),
        });
        let cache = CachingPageManager::new(
            limited.clone(),
            CacheLimits {
                max_cached_pages: 100,
                max_dirty_pages: 100,
            },
        );
        for marker in 0..3u8 {
            write(&cache, marker);
        }
        assert_eq!(cache.cache_stats().dirty, 3);

        limited.allowed.store(1, Ordering::Release);
        assert!(cache.flush().is_err());
        assert_eq!(cache.cache_stats().dirty, 2);

        limited.allowed.store(usize::MAX, Ordering::Release);
        cache.flush().unwrap();
        assert_eq!(cache.cache_stats().dirty, 0);
    }

    #[test]
    fn flush_writes_dirty_pages() {
        let dir = tempdir().unwrap();
        let (file, cache) = cache(dir.path(), CacheLimits::default());
        let id = write(&cache, 42);
        cache.flush().unwrap();
        assert_eq!(file.fetch_page(id).unwrap().body()[0], 42);
        assert_eq!(cache.cache_stats().dirty, 0);
    }
}
