use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::StorageConfig;
use crate::primitives::pager::{
    CacheStats, CachingPageManager, CompactionReport, FilePageManager, PageManager, PageMapStats,
};
use crate::storage::alloc::{Allocator, AllocatorMetricsSnapshot, DbItemReference, FIRST_FSM_PAGE};
use crate::storage::btree::BPlusTree;
use crate::storage::heading::{Heading, HEADING_PAGE};
use crate::storage::index::{open_index, AccessMethod, ConsistencyReport, Entry, IndexEngine};
use crate::storage::mvcc::{
    InventoryStats, Snapshot, TransactionInventory, TransactionState, TxnId, VersionedRecord,
};
use crate::storage::radix::RadixTree;
use crate::types::{Result, StoreError};

/// Type identity a wrapper asks the heading page for.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Identity {
    pub versioned: bool,
    pub key_type: &'static str,
    pub value_type: &'static str,
}

/// Counters reported by `stats()`.
#[derive(Clone, Debug, Serialize)]
pub struct StorageStats {
    /// Heading page as last written.
    pub heading: Heading,
    /// Page-map occupancy.
    pub pages: PageMapStats,
    /// Page cache counters.
    pub cache: CacheStats,
    /// Fraction of page fetches served by the cache.
    pub cache_success_rate: f64,
    /// Blob allocator counters.
    pub allocator: AllocatorMetricsSnapshot,
    /// Writes not yet covered by a flush.
    pub writes_since_flush: u64,
    /// Transaction counters of a versioned store.
    pub transactions: Option<InventoryStats>,
}

/// Work done by one vacuum pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct VacuumReport {
    /// Versions dropped from version chains.
    pub versions_reclaimed: u64,
    /// Keys whose chain became empty and were removed.
    pub records_removed: u64,
    /// Rolled-back transactions forgotten after the pass.
    pub transactions_forgotten: u64,
    /// Data-file compaction performed after the pass.
    pub compaction: CompactionReport,
}

/// Open store: pager stack, allocator, index and, when versioned, the transaction inventory.
pub(crate) struct Core {
    path: PathBuf,
    config: StorageConfig,
    cache: Arc<CachingPageManager>,
    alloc: Allocator,
    index: Box<dyn IndexEngine>,
    heading: Heading,
    inventory: Option<TransactionInventory>,
    writes_since_flush: u64,
}

impl Core {
    fn expected_heading(config: &StorageConfig, identity: Identity) -> Heading {
        Heading {
            access_method: config.access_method,
            versioned: identity.versioned,
            page_size: config.page_size,
            max_key_size: config.effective_max_key_size(),
            key_type: identity.key_type.to_owned(),
            value_type: identity.value_type.to_owned(),
            root: None,
            inventory: None,
            settings: config.heading_settings(),
            flush_count: 0,
        }
    }

    /// Creates a new store at `path`. Fails if it already exists.
    pub(crate) fn create(path: &Path, config: StorageConfig, identity: Identity) -> Result<Self> {
        config.validate()?;
        let file = FilePageManager::create(path, config.page_size, config.forced_writes)?;
        let cache = Arc::new(CachingPageManager::new(Arc::new(file), config.cache_limits()));
        let pager: Arc<dyn PageManager> = cache.clone();

        let heading_page = pager.create_page()?;
        let fsm_page = pager.create_page()?;
        if heading_page.index() != HEADING_PAGE || fsm_page.index() != FIRST_FSM_PAGE {
            return Err(StoreError::Corruption("fresh store did not start at page 0"));
        }
        Allocator::format(pager.as_ref())?;
        let mut alloc = Allocator::new(Arc::clone(&pager));
        let index: Box<dyn IndexEngine> = match config.access_method {
            AccessMethod::BPlusTree => Box::new(BPlusTree::create(
                Arc::clone(&pager),
                config.max_key_size as usize,
            )?),
            AccessMethod::Radix => Box::new(RadixTree::create(&mut alloc)?),
        };

        let heading = Self::expected_heading(&config, identity);
        let inventory = identity
            .versioned
            .then(|| TransactionInventory::new(config.max_transaction_id));
        let mut core = Self {
            path: path.to_path_buf(),
            config,
            cache,
            alloc,
            index,
            heading,
            inventory,
            writes_since_flush: 0,
        };
        core.flush()?;
        info!(
            path = %core.path.display(),
            access_method = %core.heading.access_method,
            versioned = core.heading.versioned,
            page_size = core.heading.page_size,
            "created store"
        );
        Ok(core)
    }

    /// Opens an existing store and checks its heading against `config` and `identity`.
    pub(crate) fn open(path: &Path, config: StorageConfig, identity: Identity) -> Result<Self> {
        config.validate()?;
        let file = FilePageManager::open(path, config.forced_writes)?;
        let cache = Arc::new(CachingPageManager::new(Arc::new(file), config.cache_limits()));
        let pager: Arc<dyn PageManager> = cache.clone();

        let heading = Heading::load(pager.as_ref())?;
        heading.validate(&Self::expected_heading(&config, identity))?;
        let alloc = Allocator::new(Arc::clone(&pager));
        let index = open_index(&heading, Arc::clone(&pager), &alloc)?;
        let inventory = if heading.versioned {
            Some(match heading.inventory {
                Some(item) => {
                    TransactionInventory::decode(&alloc.get(item)?, config.max_transaction_id)?
                }
                None => TransactionInventory::new(config.max_transaction_id),
            })
        } else {
            None
        };
        info!(
            path = %path.display(),
            access_method = %heading.access_method,
            versioned = heading.versioned,
            flushes = heading.flush_count,
            "opened store"
        );
        Ok(Self {
            path: path.to_path_buf(),
            config,
            cache,
            alloc,
            index,
            heading,
            inventory,
            writes_since_flush: 0,
        })
    }

    pub(crate) fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub(crate) fn writes_since_flush(&self) -> u64 {
        self.writes_since_flush
    }

    /// Writes the inventory and heading, then makes every page durable.
    pub(crate) fn flush(&mut self) -> Result<()> {
        if let Some(inventory) = &self.inventory {
            let encoded = inventory.encode();
            let item = match self.heading.inventory {
                Some(item) => self.alloc.reallocate(item, &encoded)?,
                None => self.alloc.allocate(&encoded)?,
            };
            self.heading.inventory = Some(item);
        }
        self.heading.root = self.index.root();
        self.heading.settings = self.config.heading_settings();
        self.heading.flush_count += 1;
        self.heading.store(self.cache.as_ref())?;
        self.cache.flush()?;
        debug!(
            path = %self.path.display(),
            writes = self.writes_since_flush,
            flushes = self.heading.flush_count,
            "flushed store"
        );
        self.writes_since_flush = 0;
        Ok(())
    }

    /// Counts a completed write and applies the flush and vacuum policies.
    pub(crate) fn after_write(&mut self) -> Result<()> {
        self.writes_since_flush += 1;
        if self.config.auto_flush_interval > 0
            && self.writes_since_flush >= self.config.auto_flush_interval
        {
            self.flush()?;
        }
        if self.needs_vacuum() {
            self.vacuum()?;
        }
        Ok(())
    }

    fn needs_vacuum(&self) -> bool {
        let threshold = u64::from(self.config.max_empty_pages);
        let stats = self.cache.stats();
        stats.released_pages > threshold && stats.reclaimable_pages > threshold
    }

    pub(crate) fn stats(&self) -> StorageStats {
        StorageStats {
            heading: self.heading.clone(),
            pages: self.cache.stats(),
            cache: self.cache.cache_stats(),
            cache_success_rate: self.cache.success_rate(),
            allocator: self.alloc.metrics(),
            writes_since_flush: self.writes_since_flush,
            transactions: self.inventory.as_ref().map(TransactionInventory::stats),
        }
    }

    pub(crate) fn check_consistency(&self) -> Result<ConsistencyReport> {
        self.index.check_consistency(&self.alloc)
    }

    fn check_blob_range(len: u64, start: usize, end: usize) -> Result<()> {
        if start > end || end as u64 > len {
            return Err(StoreError::Invalid("segment out of value bounds"));
        }
        Ok(())
    }

    // Plain values: the index maps keys straight to value blobs.

    pub(crate) fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.index.get(&self.alloc, key)? {
            Some(item) => Ok(Some(self.alloc.get(item)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.index.get(&self.alloc, key)? {
            Some(item) => {
                let moved = self.alloc.reallocate(item, value)?;
                if moved != item {
                    self.index.set(&mut self.alloc, key, moved)?;
                }
            }
            None => {
                let item = self.alloc.allocate(value)?;
                if let Err(err) = self.index.set(&mut self.alloc, key, item) {
                    self.alloc.free(item)?;
                    return Err(err);
                }
            }
        }
        self.after_write()
    }

    pub(crate) fn remove(&mut self, key: &[u8]) -> Result<bool> {
        let Some(item) = self.index.remove(&mut self.alloc, key)? else {
            return Ok(false);
        };
        self.alloc.free(item)?;
        self.after_write()?;
        Ok(true)
    }

    pub(crate) fn exists(&self, key: &[u8]) -> Result<bool> {
        self.index.exists(&self.alloc, key)
    }

    pub(crate) fn raw_data_length(&self, key: &[u8]) -> Result<Option<u64>> {
        match self.index.get(&self.alloc, key)? {
            Some(item) => Ok(Some(self.alloc.get_length(item)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn raw_data_segment(
        &self,
        key: &[u8],
        start: usize,
        end: usize,
    ) -> Result<Option<Vec<u8>>> {
        let Some(item) = self.index.get(&self.alloc, key)? else {
            return Ok(None);
        };
        Self::check_blob_range(self.alloc.get_length(item)?, start, end)?;
        Ok(Some(self.alloc.get_segment(item, start, end)?))
    }

    fn load_entry(&self, entry: Option<Entry>) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match entry {
            Some((key, item)) => Ok(Some((key, self.alloc.get(item)?))),
            None => Ok(None),
        }
    }

    pub(crate) fn min(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.load_entry(self.index.min(&self.alloc)?)
    }

    pub(crate) fn max(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.load_entry(self.index.max(&self.alloc)?)
    }

    pub(crate) fn previous_to(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.load_entry(self.index.previous_to(&self.alloc, key)?)
    }

    pub(crate) fn next_to(&self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.load_entry(self.index.next_to(&self.alloc, key)?)
    }

    pub(crate) fn count(&self) -> Result<u64> {
        self.index.count(&self.alloc)
    }

    pub(crate) fn has_sub_keys(&self, key: &[u8]) -> Result<bool> {
        self.index.has_sub_keys(&self.alloc, key)
    }

    // Versioned values: the index maps keys to version-chain blobs.

    pub(crate) fn inventory(&self) -> Result<&TransactionInventory> {
        self.inventory
            .as_ref()
            .ok_or(StoreError::Invalid("store is not versioned"))
    }

    pub(crate) fn inventory_mut(&mut self) -> Result<&mut TransactionInventory> {
        self.inventory
            .as_mut()
            .ok_or(StoreError::Invalid("store is not versioned"))
    }

    /// Marks `id` prepared and flushes. A failed flush rolls the transaction back.
    pub(crate) fn prepare(&mut self, id: TxnId) -> Result<()> {
        self.inventory_mut()?.prepare(id)?;
        if let Err(err) = self.flush() {
            warn!(txn = id, %err, "prepare failed, rolling back");
            self.inventory_mut()?.rollback(id)?;
            return Err(err);
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, id: TxnId) -> Result<()> {
        let inventory = self.inventory_mut()?;
        if inventory.state(id) == TransactionState::Active {
            inventory.prepare(id)?;
        }
        inventory.commit(id)?;
        self.after_write()
    }

    pub(crate) fn rollback(&mut self, id: TxnId) -> Result<()> {
        self.inventory_mut()?.rollback(id)?;
        self.after_write()
    }

    fn record(&self, key: &[u8]) -> Result<Option<(DbItemReference, VersionedRecord)>> {
        match self.index.get(&self.alloc, key)? {
            Some(item) => Ok(Some((item, VersionedRecord::decode(&self.alloc.get(item)?)?))),
            None => Ok(None),
        }
    }

    fn store_record(
        &mut self,
        key: &[u8],
        item: Option<DbItemReference>,
        record: &VersionedRecord,
    ) -> Result<()> {
        if record.versions.is_empty() {
            if let Some(item) = item {
                self.index.remove(&mut self.alloc, key)?;
                self.alloc.free(item)?;
            }
            return Ok(());
        }
        let encoded = record.encode();
        match item {
            Some(item) => {
                let moved = self.alloc.reallocate(item, &encoded)?;
                if moved != item {
                    self.index.set(&mut self.alloc, key, moved)?;
                }
            }
            None => {
                let item = self.alloc.allocate(&encoded)?;
                self.index.set(&mut self.alloc, key, item)?;
            }
        }
        Ok(())
    }

    fn visible_body(&self, snapshot: &Snapshot, key: &[u8]) -> Result<Option<DbItemReference>> {
        self.inventory()?.require_live(snapshot.txn())?;
        Ok(self
            .record(key)?
            .and_then(|(_, record)| record.visible(snapshot).map(|v| v.body)))
    }

    pub(crate) fn versioned_get(&self, snapshot: &Snapshot, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.visible_body(snapshot, key)? {
            Some(body) => Ok(Some(self.alloc.get(body)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn versioned_exists(&self, snapshot: &Snapshot, key: &[u8]) -> Result<bool> {
        Ok(self.visible_body(snapshot, key)?.is_some())
    }

    pub(crate) fn versioned_length(&self, snapshot: &Snapshot, key: &[u8]) -> Result<Option<u64>> {
        match self.visible_body(snapshot, key)? {
            Some(body) => Ok(Some(self.alloc.get_length(body)?)),
            None => Ok(None),
        }
    }

    pub(crate) fn versioned_segment(
        &self,
        snapshot: &Snapshot,
        key: &[u8],
        start: usize,
        end: usize,
    ) -> Result<Option<Vec<u8>>> {
        let Some(body) = self.visible_body(snapshot, key)? else {
            return Ok(None);
        };
        Self::check_blob_range(self.alloc.get_length(body)?, start, end)?;
        Ok(Some(self.alloc.get_segment(body, start, end)?))
    }

    pub(crate) fn versioned_set(
        &mut self,
        snapshot: &Snapshot,
        key: &[u8],
        value: &[u8],
    ) -> Result<()> {
        self.inventory()?.require_active(snapshot.txn())?;
        let (item, mut record) = match self.record(key)? {
            Some((item, record)) => (Some(item), record),
            None => (None, VersionedRecord::default()),
        };
        let body = self.alloc.allocate(value)?;
        let rolled_back = self.inventory()?.rolled_back();
        let replaced = match record.update(snapshot, rolled_back, body) {
            Ok(replaced) => replaced,
            Err(err) => {
                self.alloc.free(body)?;
                return Err(err);
            }
        };
        if let Err(err) = self.store_record(key, item, &record) {
            self.alloc.free(body)?;
            return Err(err);
        }
        if let Some(old) = replaced {
            self.alloc.free(old)?;
        }
        self.after_write()
    }

    pub(crate) fn versioned_remove(&mut self, snapshot: &Snapshot, key: &[u8]) -> Result<bool> {
        self.inventory()?.require_active(snapshot.txn())?;
        let Some((item, mut record)) = self.record(key)? else {
            return Ok(false);
        };
        let outcome = record.expire(snapshot, self.inventory()?.rolled_back())?;
        if !outcome.removed {
            return Ok(false);
        }
        self.store_record(key, Some(item), &record)?;
        if let Some(body) = outcome.freed_body {
            self.alloc.free(body)?;
        }
        self.after_write()?;
        Ok(true)
    }

    fn visible_entry(
        &self,
        snapshot: &Snapshot,
        entry: Option<Entry>,
    ) -> Result<Option<(Vec<u8>, Option<DbItemReference>)>> {
        let Some((key, item)) = entry else {
            return Ok(None);
        };
        let record = VersionedRecord::decode(&self.alloc.get(item)?)?;
        Ok(Some((key, record.visible(snapshot).map(|v| v.body))))
    }

    /// Walks keys from `start` in one direction until one is visible to `snapshot`.
    fn first_visible(
        &self,
        snapshot: &Snapshot,
        start: Option<Entry>,
        forward: bool,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.inventory()?.require_live(snapshot.txn())?;
        let mut entry = start;
        while let Some((key, body)) = self.visible_entry(snapshot, entry)? {
            if let Some(body) = body {
                return Ok(Some((key, self.alloc.get(body)?)));
            }
            entry = if forward {
                self.index.next_to(&self.alloc, &key)?
            } else {
                self.index.previous_to(&self.alloc, &key)?
            };
        }
        Ok(None)
    }

    pub(crate) fn versioned_min(&self, snapshot: &Snapshot) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_visible(snapshot, self.index.min(&self.alloc)?, true)
    }

    pub(crate) fn versioned_max(&self, snapshot: &Snapshot) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_visible(snapshot, self.index.max(&self.alloc)?, false)
    }

    pub(crate) fn versioned_previous_to(
        &self,
        snapshot: &Snapshot,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_visible(snapshot, self.index.previous_to(&self.alloc, key)?, false)
    }

    pub(crate) fn versioned_next_to(
        &self,
        snapshot: &Snapshot,
        key: &[u8],
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.first_visible(snapshot, self.index.next_to(&self.alloc, key)?, true)
    }

    pub(crate) fn versioned_count(&self, snapshot: &Snapshot) -> Result<u64> {
        self.inventory()?.require_live(snapshot.txn())?;
        let mut count = 0;
        let mut entry = self.index.min(&self.alloc)?;
        while let Some((key, body)) = self.visible_entry(snapshot, entry)? {
            if body.is_some() {
                count += 1;
            }
            entry = self.index.next_to(&self.alloc, &key)?;
        }
        Ok(count)
    }

    pub(crate) fn versioned_has_sub_keys(&self, snapshot: &Snapshot, key: &[u8]) -> Result<bool> {
        if self.index.access_method() != AccessMethod::Radix {
            return self.index.has_sub_keys(&self.alloc, key);
        }
        self.inventory()?.require_live(snapshot.txn())?;
        let mut entry = self.index.next_to(&self.alloc, key)?;
        while let Some((found, body)) = self.visible_entry(snapshot, entry)? {
            if !found.starts_with(key) {
                break;
            }
            if body.is_some() {
                return Ok(true);
            }
            entry = self.index.next_to(&self.alloc, &found)?;
        }
        Ok(false)
    }

    /// Reclaims dead versions, flushes and compacts the data file.
    pub(crate) fn vacuum(&mut self) -> Result<VacuumReport> {
        let mut report = VacuumReport::default();
        if let Some(inventory) = &self.inventory {
            let horizon = inventory.vacuum_horizon();
            let mut entry = self.index.min(&self.alloc)?;
            while let Some((key, item)) = entry {
                let mut record = VersionedRecord::decode(&self.alloc.get(item)?)?;
                let before = record.clone();
                let freed = record.vacuum(&horizon);
                if record != before {
                    report.versions_reclaimed += freed.len() as u64;
                    if record.versions.is_empty() {
                        report.records_removed += 1;
                    }
                    self.store_record(&key, Some(item), &record)?;
                    for body in freed {
                        self.alloc.free(body)?;
                    }
                }
                entry = self.index.next_to(&self.alloc, &key)?;
            }
            report.transactions_forgotten = horizon.rolled_back.len() as u64;
            self.inventory_mut()?.forget_rolled_back(&horizon.rolled_back);
        }
        self.flush()?;
        report.compaction = self.cache.compact()?;
        info!(
            path = %self.path.display(),
            versions = report.versions_reclaimed,
            records = report.records_removed,
            moved = report.compaction.moved_pages,
            reclaimed = report.compaction.reclaimed_bytes,
            "vacuumed store"
        );
        Ok(report)
    }

    /// Final flush before the store is dropped.
    pub(crate) fn close(mut self) -> Result<()> {
        self.flush()?;
        debug!(path = %self.path.display(), "closed store");
        Ok(())
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        if self.writes_since_flush > 0 {
            warn!(
                path = %self.path.display(),
                writes = self.writes_since_flush,
                "store dropped with unflushed writes"
            );
        }
    }
}
