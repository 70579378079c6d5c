use std::sync::Arc;

use tracing::{debug, trace};

use crate::primitives::pager::PageManager;
use crate::storage::alloc::{Allocator, DbItemReference};
use crate::storage::index::{AccessMethod, ConsistencyReport, Entry, IndexEngine};
use crate::types::{PageId, Result, StoreError};

use super::node::BPlusTreeNode;
use super::node_storage::NodeStorage;

/// B+ tree over encoded keys.
///
/// Deletion never merges siblings: an emptied leaf is unlinked and its page released, and
/// internal nodes left without children collapse upward.
pub struct BPlusTree {
    nodes: NodeStorage,
    root: PageId,
}

fn child_ref(page: PageId) -> DbItemReference {
    DbItemReference::new(page, 0)
}

impl BPlusTree {
    /// Creates an empty tree whose root leaf takes the next free page.
    pub fn create(pager: Arc<dyn PageManager>, max_key_size: usize) -> Result<Self> {
        let nodes = NodeStorage::new(pager, max_key_size)?;
        let root = nodes.create_leaf()?;
        nodes.store(&root)?;
        debug!(root = root.index.0, capacity = nodes.capacity(), "created b+ tree");
        Ok(Self {
            nodes,
            root: root.index,
        })
    }

    /// Opens the tree rooted at `root`.
    pub fn open(pager: Arc<dyn PageManager>, max_key_size: usize, root: PageId) -> Result<Self> {
        let nodes = NodeStorage::new(pager, max_key_size)?;
        nodes.fetch(root)?;
        Ok(Self { nodes, root })
    }

    /// Maximum entries per node.
    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    /// Root node page.
    pub fn root_page(&self) -> PageId {
        self.root
    }

    pub(super) fn nodes(&self) -> &NodeStorage {
        &self.nodes
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.nodes.max_key_size() {
            return Err(StoreError::KeyTooLarge {
                len: key.len(),
                max: self.nodes.max_key_size(),
            });
        }
        Ok(())
    }

    fn find_leaf(&self, key: &[u8]) -> Result<Arc<BPlusTreeNode>> {
        let mut node = self.nodes.fetch(self.root)?;
        while !node.is_leaf {
            let child = node.child_for(key)?;
            node = self.nodes.fetch(child)?;
        }
        Ok(node)
    }

    fn edge_leaf(&self, leftmost: bool) -> Result<Arc<BPlusTreeNode>> {
        let mut node = self.nodes.fetch(self.root)?;
        while !node.is_leaf {
            let child = if leftmost {
                node.first_child
            } else {
                node.entries.last().map(|(_, c)| c.page).or(node.first_child)
            };
            let child = child.ok_or(StoreError::Corruption("internal node without children"))?;
            node = self.nodes.fetch(child)?;
        }
        Ok(node)
    }

    fn split_leaf(&mut self, mut left: BPlusTreeNode) -> Result<()> {
        self.nodes.pin(left.index)?;
        let result = self.split_leaf_pinned(&mut left);
        self.nodes.unpin(left.index)?;
        result
    }

    fn split_leaf_pinned(&mut self, left: &mut BPlusTreeNode) -> Result<()> {
        let mut right = self.nodes.create_leaf()?;
        let mid = left.entries.len() / 2;
        right.entries = left.entries.split_off(mid);
        right.parent = left.parent;
        right.prev = Some(left.index);
        right.next = left.next;
        if let Some(next) = left.next {
            let mut after = self.nodes.fetch_mut(next)?;
            after.prev = Some(right.index);
            self.nodes.store(&after)?;
        }
        left.next = Some(right.index);
        let separator = right.entries[0].0.clone();
        self.nodes.store(left)?;
        self.nodes.store(&right)?;
        trace!(left = left.index.0, right = right.index.0, "split leaf");
        self.insert_into_parent(left.index, left.parent, separator, right.index)
    }

    fn insert_into_parent(
        &mut self,
        left: PageId,
        parent: Option<PageId>,
        separator: Vec<u8>,
        right: PageId,
    ) -> Result<()> {
        let Some(parent_id) = parent else {
            let mut root = self.nodes.create_internal(left)?;
            root.entries.push((separator, child_ref(right)));
            self.nodes.store(&root)?;
            for child in [left, right] {
                let mut node = self.nodes.fetch_mut(child)?;
                node.parent = Some(root.index);
                self.nodes.store(&node)?;
            }
            debug!(root = root.index.0, "tree grew a level");
            self.root = root.index;
            return Ok(());
        };
        let mut parent = self.nodes.fetch_mut(parent_id)?;
        let at = match parent.search(&separator) {
            Ok(_) => return Err(StoreError::Corruption("separator already present in parent")),
            Err(at) => at,
        };
        parent.entries.insert(at, (separator, child_ref(right)));
        if parent.entries.len() <= self.nodes.capacity() {
            return self.nodes.store(&parent);
        }
        self.nodes.pin(parent.index)?;
        let result = self.split_internal(&mut parent);
        self.nodes.unpin(parent.index)?;
        result
    }

    fn split_internal(&mut self, left: &mut BPlusTreeNode) -> Result<()> {
        let mid = left.entries.len() / 2;
        let mut moved = left.entries.split_off(mid);
        let (promoted, first) = moved.remove(0);
        let mut right = self.nodes.create_internal(first.page)?;
        right.entries = moved;
        right.parent = left.parent;
        self.nodes.store(left)?;
        self.nodes.store(&right)?;
        for child in right.children() {
            let mut node = self.nodes.fetch_mut(child)?;
            node.parent = Some(right.index);
            self.nodes.store(&node)?;
        }
        trace!(left = left.index.0, right = right.index.0, "split internal node");
        self.insert_into_parent(left.index, left.parent, promoted, right.index)
    }

    fn detach_child(&mut self, parent_id: PageId, child: PageId) -> Result<()> {
        let mut parent = self.nodes.fetch_mut(parent_id)?;
        if parent.first_child == Some(child) {
            if parent.entries.is_empty() {
                parent.first_child = None;
            } else {
                let (_, next) = parent.entries.remove(0);
                parent.first_child = Some(next.page);
            }
        } else {
            let at = parent
                .entries
                .iter()
                .position(|(_, c)| c.page == child)
                .ok_or(StoreError::Corruption("child missing from its parent"))?;
            parent.entries.remove(at);
        }
        if parent.first_child.is_none() {
            return match parent.parent {
                Some(grand) => {
                    self.nodes.remove(parent.index)?;
                    self.detach_child(grand, parent.index)
                }
                None => Err(StoreError::Corruption("root lost every child")),
            };
        }
        self.nodes.store(&parent)?;
        if parent.parent.is_none() {
            self.collapse_root()?;
        }
        Ok(())
    }

    fn collapse_root(&mut self) -> Result<()> {
        loop {
            let root = self.nodes.fetch(self.root)?;
            if root.is_leaf || !root.entries.is_empty() {
                return Ok(());
            }
            let child = root
                .first_child
                .ok_or(StoreError::Corruption("internal node without children"))?;
            let mut node = self.nodes.fetch_mut(child)?;
            node.parent = None;
            self.nodes.store(&node)?;
            self.nodes.remove(root.index)?;
            debug!(root = child.0, "tree lost a level");
            self.root = child;
        }
    }

    fn unlink_leaf(&mut self, leaf: &BPlusTreeNode) -> Result<()> {
        if let Some(prev) = leaf.prev {
            let mut node = self.nodes.fetch_mut(prev)?;
            node.next = leaf.next;
            self.nodes.store(&node)?;
        }
        if let Some(next) = leaf.next {
            let mut node = self.nodes.fetch_mut(next)?;
            node.prev = leaf.prev;
            self.nodes.store(&node)?;
        }
        self.nodes.remove(leaf.index)?;
        let parent = leaf
            .parent
            .ok_or(StoreError::Corruption("non-root leaf without parent"))?;
        self.detach_child(parent, leaf.index)
    }
}

impl IndexEngine for BPlusTree {
    fn access_method(&self) -> AccessMethod {
        AccessMethod::BPlusTree
    }

    fn root(&self) -> Option<DbItemReference> {
        Some(child_ref(self.root))
    }

    fn get(&self, _alloc: &Allocator, key: &[u8]) -> Result<Option<DbItemReference>> {
        self.check_key(key)?;
        let leaf = self.find_leaf(key)?;
        Ok(leaf.search(key).ok().map(|at| leaf.entries[at].1))
    }

    fn set(
        &mut self,
        _alloc: &mut Allocator,
        key: &[u8],
        value: DbItemReference,
    ) -> Result<Option<DbItemReference>> {
        self.check_key(key)?;
        let mut leaf = self.nodes.fetch_mut(self.find_leaf(key)?.index)?;
        match leaf.search(key) {
            Ok(at) => {
                let previous = std::mem::replace(&mut leaf.entries[at].1, value);
                self.nodes.store(&leaf)?;
                Ok(Some(previous))
            }
            Err(at) => {
                leaf.entries.insert(at, (key.to_vec(), value));
                if leaf.entries.len() > self.nodes.capacity() {
                    self.split_leaf(leaf)?;
                } else {
                    self.nodes.store(&leaf)?;
                }
                Ok(None)
            }
        }
    }

    fn remove(&mut self, _alloc: &mut Allocator, key: &[u8]) -> Result<Option<DbItemReference>> {
        self.check_key(key)?;
        let mut leaf = self.nodes.fetch_mut(self.find_leaf(key)?.index)?;
        let Ok(at) = leaf.search(key) else {
            return Ok(None);
        };
        let (_, removed) = leaf.entries.remove(at);
        if leaf.entries.is_empty() && leaf.parent.is_some() {
            self.unlink_leaf(&leaf)?;
        } else {
            self.nodes.store(&leaf)?;
        }
        Ok(Some(removed))
    }

    fn min(&self, _alloc: &Allocator) -> Result<Option<Entry>> {
        Ok(self.edge_leaf(true)?.entries.first().cloned())
    }

    fn max(&self, _alloc: &Allocator) -> Result<Option<Entry>> {
        Ok(self.edge_leaf(false)?.entries.last().cloned())
    }

    fn previous_to(&self, _alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>> {
        self.check_key(key)?;
        let mut leaf = self.find_leaf(key)?;
        loop {
            let below = leaf.entries.partition_point(|(k, _)| k.as_slice() < key);
            if below > 0 {
                return Ok(Some(leaf.entries[below - 1].clone()));
            }
            match leaf.prev {
                Some(prev) => leaf = self.nodes.fetch(prev)?,
                None => return Ok(None),
            }
        }
    }

    fn next_to(&self, _alloc: &Allocator, key: &[u8]) -> Result<Option<Entry>> {
        self.check_key(key)?;
        let mut leaf = self.find_leaf(key)?;
        loop {
            let above = leaf.entries.partition_point(|(k, _)| k.as_slice() <= key);
            if above < leaf.entries.len() {
                return Ok(Some(leaf.entries[above].clone()));
            }
            match leaf.next {
                Some(next) => leaf = self.nodes.fetch(next)?,
                None => return Ok(None),
            }
        }
    }

    fn count(&self, _alloc: &Allocator) -> Result<u64> {
        let mut leaf = self.edge_leaf(true)?;
        let mut total = leaf.entries.len() as u64;
        while let Some(next) = leaf.next {
            leaf = self.nodes.fetch(next)?;
            total += leaf.entries.len() as u64;
        }
        Ok(total)
    }

    fn check_consistency(&self, _alloc: &Allocator) -> Result<ConsistencyReport> {
        super::check::check(self)
    }
}
