#![forbid(unsafe_code)]

//! Slotted blob allocator.
//!
//! Blobs are quantized into size buckets and stored in slots of pages that hold only that
//! bucket; blobs larger than the largest bucket get a dedicated page chain. A free-space map
//! tracks slotted pages with room left.

mod fsm;
mod multipage;
mod size_range;
mod slotted;

use std::convert::TryInto;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::trace;

use crate::primitives::pager::PageManager;
use crate::types::{page::PageKind, PageId, Result, StoreError};

pub use fsm::FIRST_FSM_PAGE;
pub use size_range::{max_bucket, slot_size, slots_per_page, SizeRange};

use fsm::FreeSpaceMap;

/// Address of a stored blob.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize)]
pub struct DbItemReference {
    /// Page holding the slot, or the first page of a multi-page chain.
    pub page: PageId,
    /// Slot on the page; always 0 for multi-page blobs.
    pub slot: u16,
}

impl DbItemReference {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 10;

    /// Builds a reference.
    pub const fn new(page: PageId, slot: u16) -> Self {
        Self { page, slot }
    }

    /// Big-endian `[page u64][slot u16]`.
    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..8].copy_from_slice(&self.page.0.to_be_bytes());
        out[8..].copy_from_slice(&self.slot.to_be_bytes());
        out
    }

    /// Decodes [`DbItemReference::encode`] output.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < Self::ENCODED_LEN {
            return Err(StoreError::Corruption("item reference truncated"));
        }
        Ok(Self {
            page: PageId(u64::from_be_bytes(src[..8].try_into().unwrap())),
            slot: u16::from_be_bytes(src[8..10].try_into().unwrap()),
        })
    }

    /// Encodes an optional reference, all-ones meaning `None`.
    pub fn encode_opt(item: Option<Self>) -> [u8; Self::ENCODED_LEN] {
        match item {
            Some(item) => item.encode(),
            None => [0xFF; Self::ENCODED_LEN],
        }
    }

    /// Decodes [`DbItemReference::encode_opt`] output.
    pub fn decode_opt(src: &[u8]) -> Result<Option<Self>> {
        if src.len() < Self::ENCODED_LEN {
            return Err(StoreError::Corruption("item reference truncated"));
        }
        if src[..Self::ENCODED_LEN].iter().all(|&b| b == 0xFF) {
            Ok(None)
        } else {
            Self::decode(src).map(Some)
        }
    }
}

impl fmt::Display for DbItemReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page.0, self.slot)
    }
}

/// Counters kept by the allocator.
#[derive(Default)]
pub struct AllocatorMetrics {
    blobs_allocated: AtomicU64,
    blobs_freed: AtomicU64,
    in_place_updates: AtomicU64,
    pages_formatted: AtomicU64,
    pages_released: AtomicU64,
}

/// Snapshot of [`AllocatorMetrics`].
#[derive(Clone, Copy, Debug, Default, serde::Serialize)]
pub struct AllocatorMetricsSnapshot {
    /// Blobs stored.
    pub blobs_allocated: u64,
    /// Blobs released.
    pub blobs_freed: u64,
    /// Reallocations served without moving the blob.
    pub in_place_updates: u64,
    /// Slotted pages formatted.
    pub pages_formatted: u64,
    /// Slotted pages handed back once empty.
    pub pages_released: u64,
}

impl AllocatorMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> AllocatorMetricsSnapshot {
        AllocatorMetricsSnapshot {
            blobs_allocated: self.blobs_allocated.load(Ordering::Relaxed),
            blobs_freed: self.blobs_freed.load(Ordering::Relaxed),
            in_place_updates: self.in_place_updates.load(Ordering::Relaxed),
            pages_formatted: self.pages_formatted.load(Ordering::Relaxed),
            pages_released: self.pages_released.load(Ordering::Relaxed),
        }
    }
}

enum Stored {
    Slotted(u8),
    MultiPage,
}

/// Size-quantized blob storage over a [`PageManager`].
pub struct Allocator {
    pager: Arc<dyn PageManager>,
    fsm: FreeSpaceMap,
    metrics: AllocatorMetrics,
}

impl Allocator {
    /// Attaches to a store whose first FSM page already exists.
    pub fn new(pager: Arc<dyn PageManager>) -> Self {
        let fsm = FreeSpaceMap::new(pager.page_size());
        Self {
            pager,
            fsm,
            metrics: AllocatorMetrics::default(),
        }
    }

    /// Formats the first FSM page of a brand-new store.
    pub fn format(pager: &dyn PageManager) -> Result<()> {
        FreeSpaceMap::format_first(pager)
    }

    /// Page manager the allocator writes through.
    pub fn pager(&self) -> &Arc<dyn PageManager> {
        &self.pager
    }

    /// Allocator counters.
    pub fn metrics(&self) -> AllocatorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Slotted pages currently known to have free slots.
    pub fn pages_with_free_slots(&mut self) -> Result<usize> {
        self.fsm.tracked_pages(self.pager.as_ref())
    }

    fn stored(&self, item: DbItemReference) -> Result<Stored> {
        let page = self.pager.fetch_page(item.page)?;
        match page.kind()? {
            PageKind::Slotted => Ok(Stored::Slotted(slotted::header(&page)?.bucket)),
            PageKind::MultiPage if item.slot == 0 => Ok(Stored::MultiPage),
            PageKind::MultiPage => Err(StoreError::Invalid("multi-page blobs use slot 0")),
            _ => Err(StoreError::Invalid("reference does not point at a blob page")),
        }
    }

    /// Stores `data` and returns its reference.
    pub fn allocate(&mut self, data: &[u8]) -> Result<DbItemReference> {
        let item = match SizeRange::for_len(data.len(), self.pager.page_size()) {
            SizeRange::MultiPage => {
                let first = multipage::write(self.pager.as_ref(), &[], data)?;
                DbItemReference::new(first, 0)
            }
            SizeRange::Bucket(bucket) => self.allocate_slot(bucket, data)?,
        };
        AllocatorMetrics::bump(&self.metrics.blobs_allocated);
        trace!(item = %item, len = data.len(), "allocated blob");
        Ok(item)
    }

    fn allocate_slot(&mut self, bucket: u8, data: &[u8]) -> Result<DbItemReference> {
        loop {
            let mut page = match self.fsm.find(self.pager.as_ref(), bucket)? {
                Some(id) => self.pager.fetch_page(id)?,
                None => {
                    let mut page = self.pager.create_page()?;
                    slotted::format(&mut page, bucket);
                    AllocatorMetrics::bump(&self.metrics.pages_formatted);
                    page
                }
            };
            let Some(slot) = slotted::insert(&mut page, data)? else {
                // stale map entry
                self.fsm.set(self.pager.as_ref(), page.index(), None)?;
                continue;
            };
            self.pager.update_page(&page)?;
            let hdr = slotted::header(&page)?;
            let entry = if hdr.is_full() { None } else { Some(bucket) };
            self.fsm.set(self.pager.as_ref(), page.index(), entry)?;
            return Ok(DbItemReference::new(page.index(), slot));
        }
    }

    /// Whole blob.
    pub fn get(&self, item: DbItemReference) -> Result<Vec<u8>> {
        let page = self.pager.fetch_page(item.page)?;
        match page.kind()? {
            PageKind::Slotted => Ok(slotted::read(&page, item.slot)?.to_vec()),
            PageKind::MultiPage => {
                let len = self.get_length(item)? as usize;
                multipage::read_segment(self.pager.as_ref(), item.page, 0, len)
            }
            _ => Err(StoreError::Invalid("reference does not point at a blob page")),
        }
    }

    /// Blob length in bytes.
    pub fn get_length(&self, item: DbItemReference) -> Result<u64> {
        match self.stored(item)? {
            Stored::Slotted(_) => {
                let page = self.pager.fetch_page(item.page)?;
                Ok(slotted::read(&page, item.slot)?.len() as u64)
            }
            Stored::MultiPage => multipage::length(self.pager.as_ref(), item.page),
        }
    }

    /// Bytes `start..end` of a blob.
    pub fn get_segment(&self, item: DbItemReference, start: usize, end: usize) -> Result<Vec<u8>> {
        match self.stored(item)? {
            Stored::Slotted(_) => {
                let page = self.pager.fetch_page(item.page)?;
                let bytes = slotted::read(&page, item.slot)?;
                if start > end || end > bytes.len() {
                    return Err(StoreError::Invalid("segment out of blob bounds"));
                }
                Ok(bytes[start..end].to_vec())
            }
            Stored::MultiPage => multipage::read_segment(self.pager.as_ref(), item.page, start, end),
        }
    }

    /// Releases a blob. Slotted pages left empty are handed back to the page manager.
    pub fn free(&mut self, item: DbItemReference) -> Result<()> {
        match self.stored(item)? {
            Stored::MultiPage => multipage::free(self.pager.as_ref(), item.page)?,
            Stored::Slotted(bucket) => {
                let mut page = self.pager.fetch_page(item.page)?;
                let hdr = slotted::remove(&mut page, item.slot)?;
                if hdr.used == 0 {
                    self.fsm.set(self.pager.as_ref(), item.page, None)?;
                    self.pager.remove_page(item.page)?;
                    AllocatorMetrics::bump(&self.metrics.pages_released);
                } else {
                    self.pager.update_page(&page)?;
                    self.fsm.set(self.pager.as_ref(), item.page, Some(bucket))?;
                }
            }
        }
        AllocatorMetrics::bump(&self.metrics.blobs_freed);
        trace!(item = %item, "freed blob");
        Ok(())
    }

    /// Replaces a blob. Stays in place when the size range is unchanged, else moves.
    pub fn reallocate(&mut self, item: DbItemReference, data: &[u8]) -> Result<DbItemReference> {
        let wanted = SizeRange::for_len(data.len(), self.pager.page_size());
        match (self.stored(item)?, wanted) {
            (Stored::Slotted(current), SizeRange::Bucket(bucket)) if current == bucket => {
                let mut page = self.pager.fetch_page(item.page)?;
                slotted::overwrite(&mut page, item.slot, data)?;
                self.pager.update_page(&page)?;
                AllocatorMetrics::bump(&self.metrics.in_place_updates);
                Ok(item)
            }
            (Stored::MultiPage, SizeRange::MultiPage) => {
                let pages = multipage::chain(self.pager.as_ref(), item.page)?;
                multipage::write(self.pager.as_ref(), &pages, data)?;
                AllocatorMetrics::bump(&self.metrics.in_place_updates);
                Ok(item)
            }
            _ => {
                self.free(item)?;
                self.allocate(data)
            }
        }
    }
}
