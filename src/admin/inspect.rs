use std::fs;
use std::path::Path;

use serde::Serialize;

use crate::primitives::pager::{map_path, FilePageManager, PageManager, PageMapStats};
use crate::storage::heading::Heading;
use crate::types::{page::PageKind, PageId, Result};

/// Live pages per page kind.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PageKindCounts {
    /// Heading page.
    pub heading: u64,
    /// Free-space map pages.
    pub free_space_map: u64,
    /// B+ tree nodes.
    pub bplus_tree_nodes: u64,
    /// Slotted blob pages.
    pub slotted: u64,
    /// Pages of multi-page blobs.
    pub multi_page: u64,
    /// Issued pages never written.
    pub unformatted: u64,
}

impl PageKindCounts {
    fn record(&mut self, kind: PageKind) {
        let counter = match kind {
            PageKind::Heading => &mut self.heading,
            PageKind::FreeSpaceMap => &mut self.free_space_map,
            PageKind::BPlusTreeNode => &mut self.bplus_tree_nodes,
            PageKind::Slotted => &mut self.slotted,
            PageKind::MultiPage => &mut self.multi_page,
            PageKind::Unformatted => &mut self.unformatted,
        };
        *counter += 1;
    }
}

/// Output of [`inspect`].
#[derive(Clone, Debug, Serialize)]
pub struct InspectReport {
    /// Content file path.
    pub path: String,
    /// Size of the content file in bytes.
    pub file_bytes: u64,
    /// Size of the page-map file in bytes.
    pub map_bytes: u64,
    /// Decoded heading page.
    pub heading: Heading,
    /// Page-map counters.
    pub pages: PageMapStats,
    /// Live pages by kind.
    pub kinds: PageKindCounts,
}

/// Reads the heading and classifies every live page. Nothing is written.
pub fn inspect(path: impl AsRef<Path>) -> Result<InspectReport> {
    let path = path.as_ref();
    let pager = FilePageManager::open(path, false)?;
    let heading = Heading::load(&pager)?;
    let pages = pager.stats();
    let mut kinds = PageKindCounts::default();
    for index in (0..pages.page_count).map(PageId) {
        if pager.page_exists(index) {
            kinds.record(pager.fetch_page(index)?.kind()?);
        }
    }
    Ok(InspectReport {
        path: path.display().to_string(),
        file_bytes: fs::metadata(path)?.len(),
        map_bytes: fs::metadata(map_path(path))?.len(),
        heading,
        pages,
        kinds,
    })
}
