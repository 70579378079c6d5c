use std::sync::Arc;

use crate::primitives::pager::{Page, PageBacking, PageManager};
use crate::types::{page::PageKind, PageId, Result, StoreError};

use super::node::{node_capacity, BPlusTreeNode};

/// Loads and stores B+ tree nodes, caching decoded nodes as page backings.
pub struct NodeStorage {
    pager: Arc<dyn PageManager>,
    capacity: usize,
    max_key_size: usize,
}

impl NodeStorage {
    /// Fails when fewer than three entries fit on a node page.
    pub fn new(pager: Arc<dyn PageManager>, max_key_size: usize) -> Result<Self> {
        let capacity = node_capacity(pager.page_size(), max_key_size);
        if capacity <= 2 {
            return Err(StoreError::Invalid(
                "max key size leaves room for two or fewer entries per node",
            ));
        }
        Ok(Self {
            pager,
            capacity,
            max_key_size,
        })
    }

    /// Maximum entries per node.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Longest key accepted.
    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    /// Decoded node at `index`, served from the page backing when present.
    pub fn fetch(&self, index: PageId) -> Result<Arc<BPlusTreeNode>> {
        let mut page = self.pager.fetch_page(index)?;
        if let Some(PageBacking::BPlusTreeNode(node)) = page.backing() {
            return Ok(Arc::clone(node));
        }
        if page.kind()? != PageKind::BPlusTreeNode {
            return Err(StoreError::Corruption("tree pointer leads to a non-node page"));
        }
        let node = Arc::new(BPlusTreeNode::decode(index, page.body())?);
        page.set_backing(PageBacking::BPlusTreeNode(Arc::clone(&node)));
        self.pager.attach_backing(&page);
        Ok(node)
    }

    /// Owned copy of the node at `index`, ready to be modified.
    pub fn fetch_mut(&self, index: PageId) -> Result<BPlusTreeNode> {
        Ok(BPlusTreeNode::clone(&*self.fetch(index)?))
    }

    /// Issues a page for a new node.
    pub fn create_leaf(&self) -> Result<BPlusTreeNode> {
        Ok(BPlusTreeNode::new_leaf(self.pager.create_page()?.index()))
    }

    /// Issues a page for a new internal node.
    pub fn create_internal(&self, first_child: PageId) -> Result<BPlusTreeNode> {
        Ok(BPlusTreeNode::new_internal(
            self.pager.create_page()?.index(),
            first_child,
        ))
    }

    /// Writes `node` back and keeps its decoded form attached to the page.
    pub fn store(&self, node: &BPlusTreeNode) -> Result<()> {
        let mut page = Page::new(node.index, self.pager.page_size(), PageKind::BPlusTreeNode)?;
        node.encode(page.body_mut())?;
        page.set_backing(PageBacking::BPlusTreeNode(Arc::new(node.clone())));
        self.pager.update_page(&page)
    }

    /// Releases the page of a node.
    pub fn remove(&self, index: PageId) -> Result<()> {
        self.pager.remove_page(index)
    }

    /// Keeps a node page resident while it is being split.
    pub fn pin(&self, index: PageId) -> Result<()> {
        self.pager.pin(index)
    }

    /// Clears [`NodeStorage::pin`].
    pub fn unpin(&self, index: PageId) -> Result<()> {
        self.pager.unpin(index)
    }
}
