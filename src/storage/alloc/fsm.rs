//! Free-space map.
//!
//! One byte per page index: `0` when the page has no free slot, `bucket + 1` for a slotted
//! page of that bucket with room left. FSM pages form a chain starting at page 1; each body
//! begins with the next FSM page index.

use std::collections::{BTreeSet, HashMap};
use std::convert::TryInto;

use tracing::debug;

use crate::primitives::pager::{Page, PageManager};
use crate::types::{
    page::{PageKind, PAGE_HDR_LEN},
    PageId, Result, StoreError,
};

const NEXT_LEN: usize = 8;

/// Page index of the first FSM page.
pub const FIRST_FSM_PAGE: PageId = PageId(1);

pub(crate) struct FreeSpaceMap {
    per_page: u64,
    pages: Vec<PageId>,
    index: Option<HashMap<u8, BTreeSet<u64>>>,
}

impl FreeSpaceMap {
    pub(crate) fn new(page_size: usize) -> Self {
        Self {
            per_page: (page_size - PAGE_HDR_LEN - NEXT_LEN) as u64,
            pages: Vec::new(),
            index: None,
        }
    }

    /// Writes an empty FSM page at [`FIRST_FSM_PAGE`]. The index must already be issued.
    pub(crate) fn format_first(pager: &dyn PageManager) -> Result<()> {
        let mut page = pager.fetch_page(FIRST_FSM_PAGE)?;
        format(&mut page, None);
        pager.update_page(&page)
    }

    fn load(&mut self, pager: &dyn PageManager) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let mut index: HashMap<u8, BTreeSet<u64>> = HashMap::new();
        let mut pages = Vec::new();
        let mut next = Some(FIRST_FSM_PAGE);
        while let Some(id) = next {
            if pages.len() as u64 > pager.stats().page_count {
                return Err(StoreError::Corruption("free-space map chain cycles"));
            }
            let page = pager.fetch_page(id)?;
            if page.kind()? != PageKind::FreeSpaceMap {
                return Err(StoreError::Corruption("free-space map chain points at a foreign page"));
            }
            let body = page.body();
            let base = pages.len() as u64 * self.per_page;
            for (offset, &entry) in body[NEXT_LEN..].iter().enumerate() {
                if entry != 0 {
                    index.entry(entry - 1).or_default().insert(base + offset as u64);
                }
            }
            next = PageId::decode_opt(u64::from_be_bytes(body[..NEXT_LEN].try_into().unwrap()));
            pages.push(id);
        }
        debug!(fsm_pages = pages.len(), "loaded free-space map");
        self.pages = pages;
        self.index = Some(index);
        Ok(())
    }

    /// A slotted page of `bucket` with a free slot, if one is known.
    pub(crate) fn find(&mut self, pager: &dyn PageManager, bucket: u8) -> Result<Option<PageId>> {
        self.load(pager)?;
        Ok(self
            .index
            .as_ref()
            .and_then(|index| index.get(&bucket))
            .and_then(|pages| pages.iter().next().copied())
            .map(PageId))
    }

    /// Records that `page` has free slots of `bucket`, or none when `bucket` is `None`.
    pub(crate) fn set(
        &mut self,
        pager: &dyn PageManager,
        page: PageId,
        bucket: Option<u8>,
    ) -> Result<()> {
        self.load(pager)?;
        let fsm_no = (page.0 / self.per_page) as usize;
        if bucket.is_none() && fsm_no >= self.pages.len() {
            return Ok(());
        }
        while self.pages.len() <= fsm_no {
            self.extend(pager)?;
        }
        let mut fsm_page = pager.fetch_page(self.pages[fsm_no])?;
        let at = NEXT_LEN + (page.0 % self.per_page) as usize;
        let entry = bucket.map(|b| b + 1).unwrap_or(0);
        if fsm_page.body()[at] == entry {
            return Ok(());
        }
        let previous = fsm_page.body()[at];
        fsm_page.body_mut()[at] = entry;
        pager.update_page(&fsm_page)?;
        if let Some(index) = self.index.as_mut() {
            if previous != 0 {
                if let Some(set) = index.get_mut(&(previous - 1)) {
                    set.remove(&page.0);
                }
            }
            if let Some(bucket) = bucket {
                index.entry(bucket).or_default().insert(page.0);
            }
        }
        Ok(())
    }

    fn extend(&mut self, pager: &dyn PageManager) -> Result<()> {
        let mut new_page = pager.create_page()?;
        format(&mut new_page, None);
        pager.update_page(&new_page)?;
        let last = *self
            .pages
            .last()
            .ok_or(StoreError::Corruption("free-space map has no first page"))?;
        let mut tail = pager.fetch_page(last)?;
        tail.body_mut()[..NEXT_LEN].copy_from_slice(&new_page.index().0.to_be_bytes());
        pager.update_page(&tail)?;
        debug!(page = new_page.index().0, "extended free-space map");
        self.pages.push(new_page.index());
        Ok(())
    }

    /// Number of pages currently tracked as having free slots.
    pub(crate) fn tracked_pages(&mut self, pager: &dyn PageManager) -> Result<usize> {
        self.load(pager)?;
        Ok(self
            .index
            .as_ref()
            .map(|index| index.values().map(BTreeSet::len).sum())
            .unwrap_or(0))
    }
}

fn format(page: &mut Page, next: Option<PageId>) {
    page.set_kind(PageKind::FreeSpaceMap);
    let body = page.body_mut();
    body.fill(0);
    body[..NEXT_LEN].copy_from_slice(&PageId::encode_opt(next).to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::pager::FilePageManager;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> FilePageManager {
        let pm = FilePageManager::create(dir.join("db"), 4096, false).unwrap();
        pm.create_page().unwrap();
        pm.create_page().unwrap();
        FreeSpaceMap::format_first(&pm).unwrap();
        pm
    }

    #[test]
    fn entries_survive_reload() {
        let dir = tempdir().unwrap();
        let pm = store(dir.path());
        let mut fsm = FreeSpaceMap::new(4096);
        fsm.set(&pm, PageId(5), Some(3)).unwrap();
        fsm.set(&pm, PageId(9), Some(3)).unwrap();
        fsm.set(&pm, PageId(5), None).unwrap();
        let mut reloaded = FreeSpaceMap::new(4096);
        assert_eq!(reloaded.find(&pm, 3).unwrap(), Some(PageId(9)));
        assert_eq!(reloaded.find(&pm, 2).unwrap(), None);
    }

    #[test]
    fn chain_grows_for_high_page_indices() {
        let dir = tempdir().unwrap();
        let pm = store(dir.path());
        let mut fsm = FreeSpaceMap::new(4096);
        let far = PageId(4096 * 2 + 17);
        fsm.set(&pm, far, Some(0)).unwrap();
        assert_eq!(fsm.pages.len(), 3);
        let mut reloaded = FreeSpaceMap::new(4096);
        assert_eq!(reloaded.find(&pm, 0).unwrap(), Some(far));
        assert_eq!(reloaded.tracked_pages(&pm).unwrap(), 1);
    }
}
